//! Wire protocol error types.

use std::io;
use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Not enough bytes for the structure being decoded
    #[error("incomplete frame")]
    Incomplete,

    /// Unsupported protocol version
    #[error("version unsupported: {0}")]
    Version(u8),

    /// Unknown frame type
    #[error("unknown type {0}")]
    Type(u8),

    /// Flag bits outside the known set
    #[error("unknown flag bits {0:#06x}")]
    Flags(u16),

    /// Header checksum mismatch
    #[error("hdr checksum mismatch")]
    HdrCsum,

    /// Payload exceeds the allowed size
    #[error("size limit exceeded: {0}")]
    Size(usize),
}

impl From<WireError> for io::Error {
    fn from(err: WireError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}
