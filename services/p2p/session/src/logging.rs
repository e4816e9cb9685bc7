//! Structured logging for sessions.
//!
//! A [`Logger`] wraps a [`LogSink`] together with a fixed list of attributes
//! that is prepended to every record. [`Logger::with`] derives a logger
//! carrying additional attributes, so a session inherits whatever the
//! configuration supplied and adds its own.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use tracing::Level;

/// A single key/value log attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    /// Attribute key
    pub key: Cow<'static, str>,
    /// Rendered attribute value
    pub value: String,
}

impl Attr {
    /// Create an attribute from anything displayable
    pub fn new(key: impl Into<Cow<'static, str>>, value: impl fmt::Display) -> Self {
        Self {
            key: key.into(),
            value: value.to_string(),
        }
    }
}

impl fmt::Display for Attr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Renders an attribute slice as `k1=v1 k2=v2`
pub struct Attrs<'a>(pub &'a [Attr]);

impl fmt::Display for Attrs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, attr) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", attr)?;
        }
        Ok(())
    }
}

/// Destination for session log records
pub trait LogSink: Send + Sync {
    /// Whether records at `level` would be kept
    fn enabled(&self, _level: Level) -> bool {
        true
    }

    /// Emit one record
    fn log(&self, level: Level, message: fmt::Arguments<'_>, attrs: &[Attr]);
}

/// Sink forwarding records to `tracing` under the `session` component
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

macro_rules! tracing_event {
    ($level:expr, $message:expr, $attrs:expr) => {
        match $level {
            Level::ERROR => tracing::error!(component = "session", attrs = %Attrs($attrs), "{}", $message),
            Level::WARN => tracing::warn!(component = "session", attrs = %Attrs($attrs), "{}", $message),
            Level::INFO => tracing::info!(component = "session", attrs = %Attrs($attrs), "{}", $message),
            Level::DEBUG => tracing::debug!(component = "session", attrs = %Attrs($attrs), "{}", $message),
            _ => tracing::trace!(component = "session", attrs = %Attrs($attrs), "{}", $message),
        }
    };
}

impl LogSink for TracingSink {
    fn enabled(&self, level: Level) -> bool {
        match level {
            Level::ERROR => tracing::enabled!(Level::ERROR),
            Level::WARN => tracing::enabled!(Level::WARN),
            Level::INFO => tracing::enabled!(Level::INFO),
            Level::DEBUG => tracing::enabled!(Level::DEBUG),
            _ => tracing::enabled!(Level::TRACE),
        }
    }

    fn log(&self, level: Level, message: fmt::Arguments<'_>, attrs: &[Attr]) {
        tracing_event!(level, message, attrs);
    }
}

/// Logger decorator: an inner sink plus attributes prepended to every call
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
    attrs: Arc<[Attr]>,
}

impl Logger {
    /// Create a logger without attributes
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            attrs: Arc::from(Vec::new()),
        }
    }

    /// Derive a logger that appends `attrs` after the current ones
    pub fn with<I>(&self, attrs: I) -> Self
    where
        I: IntoIterator<Item = Attr>,
    {
        let merged: Vec<Attr> = self.attrs.iter().cloned().chain(attrs).collect();
        Self {
            sink: Arc::clone(&self.sink),
            attrs: Arc::from(merged),
        }
    }

    /// Attributes attached to every record
    pub fn attrs(&self) -> &[Attr] {
        &self.attrs
    }

    /// Emit a record at `level`
    pub fn log(&self, level: Level, message: fmt::Arguments<'_>) {
        if self.sink.enabled(level) {
            self.sink.log(level, message, &self.attrs);
        }
    }

    /// Emit at error level
    pub fn error(&self, message: fmt::Arguments<'_>) {
        self.log(Level::ERROR, message);
    }

    /// Emit at warn level
    pub fn warn(&self, message: fmt::Arguments<'_>) {
        self.log(Level::WARN, message);
    }

    /// Emit at info level
    pub fn info(&self, message: fmt::Arguments<'_>) {
        self.log(Level::INFO, message);
    }

    /// Emit at debug level
    pub fn debug(&self, message: fmt::Arguments<'_>) {
        self.log(Level::DEBUG, message);
    }

    /// Emit at trace level
    pub fn trace(&self, message: fmt::Arguments<'_>) {
        self.log(Level::TRACE, message);
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("attrs", &Attrs(&self.attrs).to_string())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Sink that keeps every record in memory
    #[derive(Default)]
    pub(crate) struct MemorySink {
        pub(crate) records: Mutex<Vec<(Level, String, String)>>,
    }

    impl LogSink for MemorySink {
        fn log(&self, level: Level, message: fmt::Arguments<'_>, attrs: &[Attr]) {
            self.records.lock().unwrap().push((
                level,
                message.to_string(),
                Attrs(attrs).to_string(),
            ));
        }
    }

    #[test]
    fn test_with_prepends_parent_attrs() {
        let sink = Arc::new(MemorySink::default());
        let base = Logger::new(sink.clone()).with([Attr::new("node", "n1")]);
        let child = base.with([Attr::new("session", 7), Attr::new("peer", "10.0.0.2:7000")]);

        child.info(format_args!("handshake accepted"));
        base.warn(format_args!("parent {}", "record"));

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0, Level::INFO);
        assert_eq!(records[0].1, "handshake accepted");
        assert_eq!(records[0].2, "node=n1 session=7 peer=10.0.0.2:7000");
        assert_eq!(records[1].1, "parent record");
        assert_eq!(records[1].2, "node=n1");
    }

    #[test]
    fn test_disabled_levels_are_skipped() {
        struct WarnOnly(Mutex<usize>);

        impl LogSink for WarnOnly {
            fn enabled(&self, level: Level) -> bool {
                level <= Level::WARN
            }

            fn log(&self, _level: Level, _message: fmt::Arguments<'_>, _attrs: &[Attr]) {
                *self.0.lock().unwrap() += 1;
            }
        }

        let sink = Arc::new(WarnOnly(Mutex::new(0)));
        let logger = Logger::new(sink.clone());
        logger.debug(format_args!("dropped"));
        logger.error(format_args!("kept"));
        assert_eq!(*sink.0.lock().unwrap(), 1);
    }
}
