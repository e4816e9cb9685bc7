//! Frame header for the node wire protocol.
//!
//! Every frame after the handshake starts with a fixed 12-byte header:
//!
//! ```text
//! +--------+--------+-----------+----------------+----------------+
//! | u8 ver | u8 typ | u16 flags | u32 payload_len| u32 hdr_csum   |
//! +--------+--------+-----------+----------------+----------------+
//! ```
//!
//! `hdr_csum` is the CRC32 of the first eight bytes.

use bitflags::bitflags;
use bytes::{Buf, BufMut, BytesMut};

use crate::WireError;

/// Wire protocol version
pub const WIRE_VERSION: u8 = 1;

/// Frame header size in bytes
pub const FRAME_HEADER_SIZE: usize = 12;

/// Frame types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameType {
    /// Application data
    #[default]
    Data = 0x00,
    /// Keep-alive ping
    Ping = 0x01,
    /// Answer to a ping
    Pong = 0x02,
}

impl TryFrom<u8> for FrameType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(FrameType::Data),
            0x01 => Ok(FrameType::Ping),
            0x02 => Ok(FrameType::Pong),
            _ => Err(WireError::Type(value)),
        }
    }
}

bitflags! {
    /// Frame flags bitmask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Flags: u16 {
        /// Sender expects a Pong for this Ping
        const PONG_REQUESTED = 1 << 0;
    }
}

/// Fixed frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol version
    pub ver: u8,
    /// Frame type
    pub typ: FrameType,
    /// Frame flags
    pub flags: Flags,
    /// Number of payload bytes after the header
    pub payload_len: u32,
    /// CRC32 of the first eight header bytes
    pub hdr_csum: u32,
}

impl FrameHeader {
    /// Create a header with a valid checksum
    pub fn new(typ: FrameType, flags: Flags, payload_len: u32) -> Self {
        Self {
            ver: WIRE_VERSION,
            typ,
            flags,
            payload_len,
            hdr_csum: header_checksum(WIRE_VERSION, typ, flags, payload_len),
        }
    }

    fn encode_prefix(&self, buf: &mut BytesMut) {
        buf.put_u8(self.ver);
        buf.put_u8(self.typ as u8);
        buf.put_u16(self.flags.bits());
        buf.put_u32(self.payload_len);
    }

    /// Encode the header (big-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(FRAME_HEADER_SIZE);
        self.encode_prefix(buf);
        buf.put_u32(self.hdr_csum);
    }

    /// Decode and validate a header (big-endian)
    pub fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        if buf.remaining() < FRAME_HEADER_SIZE {
            return Err(WireError::Incomplete);
        }

        let ver = buf.get_u8();
        if ver != WIRE_VERSION {
            return Err(WireError::Version(ver));
        }

        let typ = FrameType::try_from(buf.get_u8())?;
        let raw_flags = buf.get_u16();
        let flags = Flags::from_bits(raw_flags).ok_or(WireError::Flags(raw_flags))?;
        let payload_len = buf.get_u32();
        let hdr_csum = buf.get_u32();

        let header = Self {
            ver,
            typ,
            flags,
            payload_len,
            hdr_csum,
        };
        header.validate()?;
        Ok(header)
    }

    /// Check the version and checksum
    pub fn validate(&self) -> Result<(), WireError> {
        if self.ver != WIRE_VERSION {
            return Err(WireError::Version(self.ver));
        }

        if self.hdr_csum != header_checksum(self.ver, self.typ, self.flags, self.payload_len) {
            return Err(WireError::HdrCsum);
        }

        Ok(())
    }
}

impl Default for FrameHeader {
    fn default() -> Self {
        Self::new(FrameType::Data, Flags::empty(), 0)
    }
}

/// CRC32 over the first eight encoded header bytes
pub fn header_checksum(ver: u8, typ: FrameType, flags: Flags, payload_len: u32) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[ver, typ as u8]);
    hasher.update(&flags.bits().to_be_bytes());
    hasher.update(&payload_len.to_be_bytes());
    hasher.finalize()
}
