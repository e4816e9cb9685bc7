//! Protocol-agnostic peer-to-peer sessions over duplex byte streams.
//!
//! A session wraps one stream and runs its receive, send and optional
//! keep-alive loops concurrently. The wire format is supplied by a
//! [`Protocol`] implementation; decoded traffic is delivered to a [`Handler`].
//!
//! ## Features
//!
//! - **Handshake gating**: framed messages are only delivered after the
//!   peer handshake was accepted
//! - **Serialized writes**: a single-slot queue keeps writes in order and
//!   bounded by a timeout
//! - **Keep-alive**: protocol pings injected through the normal write path
//! - **Convergent close**: concurrent `close` calls share one teardown and
//!   one result
//!
//! ## Example
//!
//! ```rust,no_run
//! use p2p_session::{Network, Session, SessionConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(
//! #     protocol: Arc<dyn p2p_session::Protocol>,
//! #     handler: Arc<dyn p2p_session::Handler>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let network = Network::new();
//! let shutdown = CancellationToken::new();
//!
//! let config = SessionConfig::builder()
//!     .protocol(protocol)
//!     .handler(handler)
//!     .keep_alive(true)
//!     .keep_alive_interval(Duration::from_secs(15))
//!     .build();
//!
//! let stream = p2p_session::connect_tcp("127.0.0.1:7000".parse()?).await?;
//! let session: Session = network.new_session(&shutdown, stream, config)?;
//! session.write(&b"hello"[..]).await?;
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
mod keepalive;
pub mod logging;
pub mod network;
pub mod protocol;
mod receive;
pub mod session;
pub mod task_group;
pub mod timer;
pub mod transport;

// Re-export main types
pub use config::{
    SessionConfig, SessionConfigBuilder, DEFAULT_KEEP_ALIVE_INTERVAL, DEFAULT_WRITE_TIMEOUT,
};
pub use error::{BoxError, SessionError};
pub use logging::{Attr, Attrs, LogSink, Logger, TracingSink};
pub use network::Network;
pub use protocol::{Handler, Handshake, Header, Message, Protocol, Reader};
pub use session::Session;
pub use task_group::TaskGroup;
pub use timer::{PooledTimer, TimerPool, MAX_IDLE_TIMERS};
pub use transport::{connect_tcp, listen_tcp, Connection};
