//! Session error types.

use std::fmt;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Boxed error returned by protocol collaborators
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by sessions and their loops.
///
/// The type is `Clone` so that every concurrent caller of
/// [`Session::close`](crate::Session::close) observes the same outcome.
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    /// Configuration has no protocol
    #[error("session config: protocol is required")]
    MissingProtocol,

    /// Configuration has no handler
    #[error("session config: handler is required")]
    MissingHandler,

    /// Keep-alive enabled with a zero interval
    #[error("session config: keep-alive interval must be positive")]
    InvalidKeepAliveInterval,

    /// Write timeout is zero
    #[error("session config: connection write timeout must be positive")]
    InvalidWriteTimeout,

    /// The network has no timer pool
    #[error("session config: timer pool is required")]
    MissingTimerPool,

    /// The peer or the stream signalled closure
    #[error("connection closed")]
    ConnectionClosed,

    /// The protocol rejected the peer handshake
    #[error("unacceptable handshake")]
    UnacceptableHandshake,

    /// The session was cancelled or closed while the operation was pending
    #[error("session shutdown")]
    Shutdown,

    /// The write did not complete within the configured timeout
    #[error("write timeout")]
    WriteTimeout,

    /// Underlying stream failure
    #[error("i/o error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// The protocol could not produce ping bytes
    #[error("keep-alive protocol failure: {0}")]
    KeepAliveProtocol(#[source] Arc<dyn std::error::Error + Send + Sync + 'static>),

    /// A ping could not be sent
    #[error("keep-alive timeout")]
    KeepAliveTimeout,

    /// Several loops failed; produced by `close`
    #[error("{}", DisplayJoined(.0))]
    Multiple(Vec<SessionError>),
}

impl SessionError {
    /// Whether this error is the connection-closed condition
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionError::ConnectionClosed)
    }

    /// Wrap an I/O error as-is, without closed-kind classification
    pub(crate) fn io(err: io::Error) -> Self {
        SessionError::Io(Arc::new(err))
    }

    /// Join optional errors into one result, flattening nested joins
    pub fn join<I>(errors: I) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = Option<SessionError>>,
    {
        let mut all = Vec::new();
        for err in errors.into_iter().flatten() {
            match err {
                SessionError::Multiple(inner) => all.extend(inner),
                other => all.push(other),
            }
        }

        match all.len() {
            0 => Ok(()),
            1 => Err(all.remove(0)),
            _ => Err(SessionError::Multiple(all)),
        }
    }
}

impl From<io::Error> for SessionError {
    fn from(err: io::Error) -> Self {
        if is_closed_kind(err.kind()) {
            SessionError::ConnectionClosed
        } else {
            SessionError::Io(Arc::new(err))
        }
    }
}

/// I/O error kinds that mean the other side went away
pub(crate) fn is_closed_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}

struct DisplayJoined<'a>(&'a [SessionError]);

impl fmt::Display for DisplayJoined<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_kinds_map_to_connection_closed() {
        let err: SessionError = io::Error::from(io::ErrorKind::UnexpectedEof).into();
        assert!(err.is_closed());

        let err: SessionError = io::Error::from(io::ErrorKind::ConnectionReset).into();
        assert!(err.is_closed());

        let err: SessionError = io::Error::new(io::ErrorKind::InvalidData, "bad frame").into();
        assert!(matches!(err, SessionError::Io(_)));
    }

    #[test]
    fn test_join() {
        assert!(SessionError::join([None, None]).is_ok());

        let single = SessionError::join([None, Some(SessionError::WriteTimeout)]).unwrap_err();
        assert!(matches!(single, SessionError::WriteTimeout));

        let joined = SessionError::join([
            Some(SessionError::KeepAliveTimeout),
            Some(SessionError::Multiple(vec![
                SessionError::WriteTimeout,
                SessionError::UnacceptableHandshake,
            ])),
        ])
        .unwrap_err();

        match &joined {
            SessionError::Multiple(all) => assert_eq!(all.len(), 3),
            other => panic!("expected joined error, got {:?}", other),
        }
        assert_eq!(
            joined.to_string(),
            "keep-alive timeout; write timeout; unacceptable handshake"
        );
    }
}
