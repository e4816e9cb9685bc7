//! Session protocol for the node wire format.
//!
//! [`NodeProtocol`] plugs [`Hello`] and [`FrameHeader`] into a
//! [`p2p_session::Session`]: a peer is accepted when it speaks the same
//! network magic and wire version under a different node id, and frames are
//! delivered when their payload fits `max_payload`.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use p2p_session::{BoxError, Handshake, Header, Message, Protocol, Reader, Session};
use std::any::Any;
use std::io;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::header::{Flags, FrameHeader, FrameType, FRAME_HEADER_SIZE, WIRE_VERSION};
use crate::hello::{Hello, HELLO_SIZE};
use crate::WireError;

/// Default upper bound for frame payloads (16 MiB)
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

#[async_trait]
impl Handshake for Hello {
    async fn read_from(&mut self, reader: Reader<'_>) -> io::Result<()> {
        let mut raw = [0u8; HELLO_SIZE];
        reader.read_exact(&mut raw).await?;
        *self = Hello::decode(&mut &raw[..])?;
        Ok(())
    }

    fn write_to(&self, buf: &mut BytesMut) {
        self.encode(buf);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl Header for FrameHeader {
    async fn read_from(&mut self, reader: Reader<'_>) -> io::Result<()> {
        let mut raw = [0u8; FRAME_HEADER_SIZE];
        reader.read_exact(&mut raw).await?;
        *self = FrameHeader::decode(&mut &raw[..])?;
        Ok(())
    }

    fn write_to(&self, buf: &mut BytesMut) {
        self.encode(buf);
    }

    fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE
    }

    fn payload_len(&self) -> usize {
        self.payload_len as usize
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Frame header of a message decoded by [`NodeProtocol`]
pub fn frame_header<'a>(message: &Message<'a>) -> Option<&'a FrameHeader> {
    message.header().as_any().downcast_ref::<FrameHeader>()
}

/// Wire protocol of one node
#[derive(Debug, Clone)]
pub struct NodeProtocol {
    network_magic: u32,
    node_id: u64,
    max_payload: usize,
}

impl NodeProtocol {
    /// Create a protocol with the default payload limit
    pub fn new(network_magic: u32, node_id: u64) -> Self {
        Self {
            network_magic,
            node_id,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// Override the payload limit
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    /// Network magic
    pub fn network_magic(&self) -> u32 {
        self.network_magic
    }

    /// Local node id
    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    /// Payload limit
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// This node's encoded hello
    pub fn hello(&self) -> Bytes {
        Hello::new(self.network_magic, self.node_id).to_bytes()
    }

    /// Encode a complete frame
    pub fn encode_frame(&self, typ: FrameType, flags: Flags, payload: &[u8]) -> Result<Bytes, WireError> {
        if payload.len() > self.max_payload {
            return Err(WireError::Size(payload.len()));
        }
        let payload_len = u32::try_from(payload.len()).map_err(|_| WireError::Size(payload.len()))?;

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
        FrameHeader::new(typ, flags, payload_len).encode(&mut buf);
        buf.put_slice(payload);
        Ok(buf.freeze())
    }

    /// Encode a data frame
    pub fn data_frame(&self, payload: &[u8]) -> Result<Bytes, WireError> {
        self.encode_frame(FrameType::Data, Flags::empty(), payload)
    }

    /// Encode an empty pong frame
    pub fn pong_frame(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE);
        FrameHeader::new(FrameType::Pong, Flags::empty(), 0).encode(&mut buf);
        buf.freeze()
    }
}

impl Protocol for NodeProtocol {
    fn empty_handshake(&self) -> Box<dyn Handshake> {
        Box::<Hello>::default()
    }

    fn empty_header(&self) -> Box<dyn Header> {
        Box::<FrameHeader>::default()
    }

    fn ping(&self) -> Result<Bytes, BoxError> {
        Ok(self.encode_frame(FrameType::Ping, Flags::PONG_REQUESTED, &[])?)
    }

    fn is_acceptable_handshake(&self, session: &Session, handshake: &dyn Handshake) -> bool {
        let Some(hello) = handshake.as_any().downcast_ref::<Hello>() else {
            return false;
        };

        let accepted = hello.network_magic == self.network_magic
            && hello.version == WIRE_VERSION
            && hello.node_id != self.node_id;
        if !accepted {
            debug!(
                component = "wire",
                session = session.id(),
                network_magic = hello.network_magic,
                version = hello.version,
                node_id = hello.node_id,
                "Peer hello rejected"
            );
        }
        accepted
    }

    fn is_acceptable_message(&self, session: &Session, header: &dyn Header) -> bool {
        let Some(header) = header.as_any().downcast_ref::<FrameHeader>() else {
            return false;
        };

        let accepted = header.payload_len as usize <= self.max_payload;
        if !accepted {
            debug!(
                component = "wire",
                session = session.id(),
                payload_len = header.payload_len,
                max_payload = self.max_payload,
                "Oversized frame skipped"
            );
        }
        accepted
    }
}
