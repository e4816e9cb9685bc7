//! Keep-alive loop.
//!
//! Once the session is established, every interval tick asks the protocol for
//! ping bytes and sends them through the regular write path, so pings queue
//! behind application writes and are bounded by the same write timeout.

use std::sync::Arc;
use std::time::Duration;

use crate::error::SessionError;
use crate::session::{Payload, Session};
use crate::timer::PooledTimer;

impl Session {
    pub(crate) async fn keep_alive_loop(self) -> Result<(), SessionError> {
        let interval = self.inner.keep_alive_interval;
        let mut timer = self.inner.timers.get();
        let result = self.keep_alive_ticks(&mut timer, interval).await;
        self.inner.timers.put(timer);
        result
    }

    async fn keep_alive_ticks(
        &self,
        timer: &mut PooledTimer,
        interval: Duration,
    ) -> Result<(), SessionError> {
        loop {
            timer.arm(interval);
            tokio::select! {
                _ = self.inner.cancel.cancelled() => return Err(SessionError::Shutdown),
                _ = &mut *timer => {}
            }

            if !self.is_established() {
                continue;
            }

            let ping = self.inner.protocol.ping().map_err(|err| {
                self.inner
                    .log
                    .warn(format_args!("Keep-alive ping encoding failed: {}", err));
                SessionError::KeepAliveProtocol(Arc::from(err))
            })?;

            match self.send(Payload::Bytes(ping)).await {
                Ok(()) => self.inner.log.trace(format_args!("Keep-alive ping sent")),
                Err(SessionError::Shutdown) => return Ok(()),
                Err(err) => {
                    self.inner
                        .log
                        .warn(format_args!("Keep-alive ping failed: {}", err));
                    return Err(SessionError::KeepAliveTimeout);
                }
            }
        }
    }
}
