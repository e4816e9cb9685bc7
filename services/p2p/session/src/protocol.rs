//! Collaborator interfaces supplied by the session's owner.
//!
//! The session core never interprets bytes itself: a [`Protocol`] provides
//! the handshake and header codecs plus the acceptance rules, and a
//! [`Handler`] consumes everything the receive loop decodes.

use crate::error::{BoxError, SessionError};
use crate::session::Session;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::any::Any;
use std::fmt;
use std::io;
use tokio::io::AsyncRead;

/// Reader type handed to the codecs
pub type Reader<'a> = &'a mut (dyn AsyncRead + Send + Unpin);

/// One-time negotiation message exchanged before framed traffic
#[async_trait]
pub trait Handshake: Send + Sync + fmt::Debug {
    /// Decode the handshake from the stream
    async fn read_from(&mut self, reader: Reader<'_>) -> io::Result<()>;

    /// Append the encoded handshake to `buf`
    fn write_to(&self, buf: &mut BytesMut);

    /// Access the concrete type, for acceptance checks
    fn as_any(&self) -> &dyn Any;
}

/// Message header declaring its own and its payload's length
#[async_trait]
pub trait Header: Send + Sync + fmt::Debug {
    /// Decode the header from the stream
    async fn read_from(&mut self, reader: Reader<'_>) -> io::Result<()>;

    /// Append the encoded header to `buf`
    fn write_to(&self, buf: &mut BytesMut);

    /// Length of the encoded header in bytes
    fn encoded_len(&self) -> usize;

    /// Number of payload bytes following the header
    fn payload_len(&self) -> usize;

    /// Access the concrete type, for acceptance checks
    fn as_any(&self) -> &dyn Any;
}

/// Wire protocol spoken over a session
pub trait Protocol: Send + Sync {
    /// Fresh handshake value to decode into
    fn empty_handshake(&self) -> Box<dyn Handshake>;

    /// Fresh header value to decode into
    fn empty_header(&self) -> Box<dyn Header>;

    /// Encoded keep-alive ping
    fn ping(&self) -> Result<Bytes, BoxError>;

    /// Whether the peer handshake allows establishing the session
    fn is_acceptable_handshake(&self, session: &Session, handshake: &dyn Handshake) -> bool;

    /// Whether a message should be delivered; rejected payloads are skipped.
    ///
    /// The receive buffer is sized from the header's declared lengths, so
    /// this check is the only bound on how much a peer can make the session
    /// allocate. Reject payload lengths above what the protocol allows.
    fn is_acceptable_message(&self, session: &Session, header: &dyn Header) -> bool;
}

/// Received message, borrowed from the session's receive buffer.
///
/// The view is only valid during [`Handler::on_receive`]; copy anything that
/// must outlive the call.
#[derive(Clone, Copy)]
pub struct Message<'a> {
    header: &'a dyn Header,
    frame: &'a [u8],
    header_len: usize,
}

impl<'a> Message<'a> {
    pub(crate) fn new(header: &'a dyn Header, frame: &'a [u8], header_len: usize) -> Self {
        Self {
            header,
            frame,
            header_len,
        }
    }

    /// The decoded header
    pub fn header(&self) -> &'a dyn Header {
        self.header
    }

    /// Header encoding followed by the payload
    pub fn bytes(&self) -> &'a [u8] {
        self.frame
    }

    /// Payload bytes only
    pub fn payload(&self) -> &'a [u8] {
        &self.frame[self.header_len..]
    }
}

impl fmt::Debug for Message<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("header", &self.header)
            .field("payload_len", &self.payload().len())
            .finish()
    }
}

/// Consumer of session events.
///
/// Every method is called synchronously from a session loop. Implementations
/// must not block; to reply, spawn a task holding a clone of the session.
pub trait Handler: Send + Sync {
    /// A framed message was accepted
    fn on_receive(&self, session: &Session, message: Message<'_>);

    /// The peer handshake was accepted; fires once
    fn on_handshake(&self, session: &Session, handshake: &dyn Handshake);

    /// The peer handshake was rejected; fires once
    fn on_handshake_failed(&self, session: &Session, handshake: &dyn Handshake);

    /// The peer or the stream signalled closure
    fn on_close(&self, session: &Session);

    /// Any other receive failure
    fn on_failure(&self, session: &Session, error: &SessionError);
}
