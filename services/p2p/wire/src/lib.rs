//! Node wire protocol: hello handshake, checksummed frame headers and the
//! [`p2p_session::Protocol`] implementation that speaks them.
//!
//! ## Wire Format
//!
//! ```text
//! handshake (once, each direction)
//! +----------------------+------------+--------------+
//! | u32 network_magic    | u8 version | u64 node_id  |
//! +----------------------+------------+--------------+
//!
//! every frame afterwards
//! +------------------------+---------------------------+
//! | Frame Header (12B)     | ver, typ, flags, len, crc |
//! +------------------------+---------------------------+
//! | payload                | payload_len bytes         |
//! +------------------------+---------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod header;
pub mod hello;
pub mod protocol;

// Re-export main types
pub use error::WireError;
pub use header::{header_checksum, Flags, FrameHeader, FrameType, FRAME_HEADER_SIZE, WIRE_VERSION};
pub use hello::{Hello, HELLO_SIZE};
pub use protocol::{frame_header, NodeProtocol, DEFAULT_MAX_PAYLOAD};
