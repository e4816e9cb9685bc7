//! Session configuration.

use crate::logging::{Attr, LogSink, TracingSink};
use crate::protocol::{Handler, Protocol};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default keep-alive interval
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Default connection write timeout
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a single session.
///
/// Built once through [`SessionConfig::builder`] and read-only afterwards.
/// Validation happens when the session is created, see
/// [`Network::new_session`](crate::Network::new_session).
#[derive(Clone)]
pub struct SessionConfig {
    /// Wire protocol collaborator
    pub(crate) protocol: Option<Arc<dyn Protocol>>,
    /// Event handler collaborator
    pub(crate) handler: Option<Arc<dyn Handler>>,
    /// Whether the keep-alive loop runs
    pub(crate) keep_alive: bool,
    /// Interval between pings
    pub(crate) keep_alive_interval: Duration,
    /// Bound for every write
    pub(crate) write_timeout: Duration,
    /// Log destination
    pub(crate) log_sink: Arc<dyn LogSink>,
    /// Static attributes attached to every record
    pub(crate) log_attrs: Vec<Attr>,
}

impl SessionConfig {
    /// Start building a configuration
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Whether the keep-alive loop is enabled
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Interval between pings
    pub fn keep_alive_interval(&self) -> Duration {
        self.keep_alive_interval
    }

    /// Bound for every write
    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Static log attributes
    pub fn log_attrs(&self) -> &[Attr] {
        &self.log_attrs
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("protocol", &self.protocol.is_some())
            .field("handler", &self.handler.is_some())
            .field("keep_alive", &self.keep_alive)
            .field("keep_alive_interval", &self.keep_alive_interval)
            .field("write_timeout", &self.write_timeout)
            .field("log_attrs", &self.log_attrs)
            .finish()
    }
}

/// Fluent builder for [`SessionConfig`]
#[derive(Clone)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self {
            config: SessionConfig {
                protocol: None,
                handler: None,
                keep_alive: false,
                keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
                write_timeout: DEFAULT_WRITE_TIMEOUT,
                log_sink: Arc::new(TracingSink),
                log_attrs: Vec::new(),
            },
        }
    }
}

impl SessionConfigBuilder {
    /// Set the wire protocol
    pub fn protocol(mut self, protocol: Arc<dyn Protocol>) -> Self {
        self.config.protocol = Some(protocol);
        self
    }

    /// Set the event handler
    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.config.handler = Some(handler);
        self
    }

    /// Enable or disable the keep-alive loop
    pub fn keep_alive(mut self, enabled: bool) -> Self {
        self.config.keep_alive = enabled;
        self
    }

    /// Set the interval between pings
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.config.keep_alive_interval = interval;
        self
    }

    /// Set the bound for every write
    pub fn connection_write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    /// Set the log destination
    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.config.log_sink = sink;
        self
    }

    /// Add static log attributes
    pub fn log_attrs<I>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = Attr>,
    {
        self.config.log_attrs.extend(attrs);
        self
    }

    /// Finish building
    pub fn build(self) -> SessionConfig {
        self.config
    }
}
