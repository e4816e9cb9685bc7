//! Handshake message exchanged once at session start.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::header::WIRE_VERSION;
use crate::WireError;

/// Encoded hello size in bytes
pub const HELLO_SIZE: usize = 13;

/// Hello handshake (13 bytes, big-endian): network magic, version, node id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hello {
    /// Identifies the network; peers on other networks are rejected
    pub network_magic: u32,
    /// Sender's wire version
    pub version: u8,
    /// Sender's node id
    pub node_id: u64,
}

impl Hello {
    /// Create a hello for the current wire version
    pub fn new(network_magic: u32, node_id: u64) -> Self {
        Self {
            network_magic,
            version: WIRE_VERSION,
            node_id,
        }
    }

    /// Encode the hello
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(HELLO_SIZE);
        buf.put_u32(self.network_magic);
        buf.put_u8(self.version);
        buf.put_u64(self.node_id);
    }

    /// Encode into a fresh buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HELLO_SIZE);
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode a hello; acceptance is left to the protocol
    pub fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        if buf.remaining() < HELLO_SIZE {
            return Err(WireError::Incomplete);
        }

        Ok(Self {
            network_magic: buf.get_u32(),
            version: buf.get_u8(),
            node_id: buf.get_u64(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_layout() {
        let hello = Hello::new(0xCAFE_F00D, 0x0102_0304_0506_0708);
        let bytes = hello.to_bytes();

        assert_eq!(bytes.len(), HELLO_SIZE);
        assert_eq!(&bytes[..4], &[0xCA, 0xFE, 0xF0, 0x0D]);
        assert_eq!(bytes[4], WIRE_VERSION);
        assert_eq!(&bytes[5..], &[1, 2, 3, 4, 5, 6, 7, 8]);

        assert_eq!(Hello::decode(&mut &bytes[..]).unwrap(), hello);
    }

    #[test]
    fn test_short_hello() {
        assert_eq!(Hello::decode(&mut &[0u8; 12][..]), Err(WireError::Incomplete));
    }
}
