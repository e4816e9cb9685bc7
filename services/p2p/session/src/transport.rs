//! Duplex streams a session can run over.
//!
//! Any tokio byte stream works; [`Connection`] only adds the optional local
//! and peer addresses a session reports about itself.

use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::{TcpListener, TcpStream};

/// Duplex byte stream owned by a session
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Address of the remote side, if the stream has one
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Address of the local side, if the stream has one
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl Connection for TcpStream {
    fn peer_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        TcpStream::local_addr(self).ok()
    }
}

impl Connection for DuplexStream {}

/// Create a TCP listener bound to the given address
pub async fn listen_tcp(addr: SocketAddr) -> tokio::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Connect to a TCP address
pub async fn connect_tcp(addr: SocketAddr) -> tokio::io::Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
