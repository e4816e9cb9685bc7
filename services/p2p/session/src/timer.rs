//! Pool of reusable timeout timers.
//!
//! Every write and every keep-alive tick races a timer. Recycling the pinned
//! `Sleep` allocations keeps that hot path free of per-operation allocation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Instant, Sleep};

/// Maximum number of idle timers kept by a pool
pub const MAX_IDLE_TIMERS: usize = 1024;

/// Roughly thirty years, used to park stopped timers.
const PARKED: Duration = Duration::from_secs(86400 * 365 * 30);

/// A timer borrowed from a [`TimerPool`].
///
/// The timer starts stopped. [`arm`](PooledTimer::arm) sets its deadline and
/// the timer can then be awaited, also by reference inside `tokio::select!`.
#[derive(Debug)]
pub struct PooledTimer {
    sleep: Pin<Box<Sleep>>,
}

impl PooledTimer {
    fn parked() -> Self {
        Self {
            sleep: Box::pin(tokio::time::sleep_until(Instant::now() + PARKED)),
        }
    }

    /// Fire after `duration` from now
    pub fn arm(&mut self, duration: Duration) {
        self.sleep.as_mut().reset(Instant::now() + duration);
    }

    /// Stop the timer, discarding a tick that already fired
    pub fn stop(&mut self) {
        self.sleep.as_mut().reset(Instant::now() + PARKED);
    }

    /// Whether the armed deadline has passed
    pub fn is_elapsed(&self) -> bool {
        self.sleep.is_elapsed()
    }
}

impl Future for PooledTimer {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.sleep.as_mut().poll(cx)
    }
}

/// Pool of stopped timers shared by all sessions of one network.
///
/// Timers are bound to the tokio runtime they were created in; a pool must
/// not outlive that runtime.
#[derive(Debug, Default)]
pub struct TimerPool {
    idle: Mutex<Vec<PooledTimer>>,
}

impl TimerPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a stopped timer, allocating one if the pool is empty
    pub fn get(&self) -> PooledTimer {
        let reused = match self.idle.lock() {
            Ok(mut idle) => idle.pop(),
            Err(poisoned) => poisoned.into_inner().pop(),
        };
        reused.unwrap_or_else(PooledTimer::parked)
    }

    /// Stop a timer and return it to the pool
    pub fn put(&self, mut timer: PooledTimer) {
        timer.stop();
        let mut idle = match self.idle.lock() {
            Ok(idle) => idle,
            Err(poisoned) => poisoned.into_inner(),
        };
        if idle.len() < MAX_IDLE_TIMERS {
            idle.push(timer);
        }
    }

    /// Number of idle timers currently pooled
    pub fn idle(&self) -> usize {
        match self.idle.lock() {
            Ok(idle) => idle.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}
