//! Session factory.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::session::{Parts, Session};
use crate::timer::TimerPool;
use crate::transport::Connection;

/// Creates sessions that share one timer pool.
///
/// A network is cheap to clone. Create it inside the tokio runtime its
/// sessions will run on.
#[derive(Debug, Clone)]
pub struct Network {
    timers: Option<Arc<TimerPool>>,
}

impl Network {
    /// Create a network with a fresh timer pool
    pub fn new() -> Self {
        Self {
            timers: Some(Arc::new(TimerPool::new())),
        }
    }

    /// Create a network around an existing pool, or none at all
    pub fn with_timer_pool(timers: Option<Arc<TimerPool>>) -> Self {
        Self { timers }
    }

    /// The shared timer pool
    pub fn timer_pool(&self) -> Option<&Arc<TimerPool>> {
        self.timers.as_ref()
    }

    /// Validate `config` and start a session over `stream`.
    ///
    /// The session gets a child of `parent`: cancelling `parent` stops every
    /// loop of the session, while closing the session leaves `parent`
    /// untouched. On a validation error nothing is started and `stream` is
    /// dropped.
    pub fn new_session<C: Connection>(
        &self,
        parent: &CancellationToken,
        stream: C,
        config: SessionConfig,
    ) -> Result<Session, SessionError> {
        let protocol = config
            .protocol
            .clone()
            .ok_or(SessionError::MissingProtocol)?;
        let handler = config
            .handler
            .clone()
            .ok_or(SessionError::MissingHandler)?;

        if config.keep_alive && config.keep_alive_interval.is_zero() {
            return Err(SessionError::InvalidKeepAliveInterval);
        }
        if config.write_timeout.is_zero() {
            return Err(SessionError::InvalidWriteTimeout);
        }

        let timers = self.timers.clone().ok_or(SessionError::MissingTimerPool)?;

        Ok(Session::spawn(
            stream,
            parent.child_token(),
            Parts {
                protocol,
                handler,
                timers,
                config,
            },
        ))
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}
