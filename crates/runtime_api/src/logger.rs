//! Structured logger handed to plugin code.
//!
//! The logger forwards to `tracing` so plugin output lands in the same
//! subscriber as the host's own logs. Fields attached with
//! [`Logger::with_field`] travel with every message emitted through the
//! returned logger.

use std::collections::BTreeMap;
use tracing::{debug, error, info, trace, warn};

/// Severity levels for plugin log output.
///
/// # Examples
///
/// ```rust
/// use runtime_api::{LogLevel, Logger};
///
/// let logger = Logger::new("lobby");
/// logger.log(LogLevel::Info, "lobby module loaded");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Critical errors that may affect match or module stability
    Error,
    /// Conditions that should be investigated
    Warn,
    /// General informational messages
    Info,
    /// Detailed information for debugging
    Debug,
    /// Very detailed trace information
    Trace,
}

/// A logger with structured key/value fields.
///
/// Cloning is cheap enough for per-callback use; `with_field` and
/// `with_fields` never mutate the receiver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Logger {
    module: String,
    fields: BTreeMap<String, String>,
}

impl Logger {
    /// Creates a logger tagged with a module name.
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            fields: BTreeMap::new(),
        }
    }

    /// The module this logger belongs to.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Returns a new logger with one additional field.
    pub fn with_field(&self, key: impl Into<String>, value: impl Into<String>) -> Logger {
        let mut fields = self.fields.clone();
        fields.insert(key.into(), value.into());
        Logger {
            module: self.module.clone(),
            fields,
        }
    }

    /// Returns a new logger with the given fields merged in.
    ///
    /// Keys already present are overwritten by the new values.
    pub fn with_fields<I, K, V>(&self, pairs: I) -> Logger
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut fields = self.fields.clone();
        fields.extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        Logger {
            module: self.module.clone(),
            fields,
        }
    }

    /// The fields associated with this logger.
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// Logs at the given level and returns the message that was logged.
    pub fn log(&self, level: LogLevel, message: impl AsRef<str>) -> String {
        let message = message.as_ref().to_string();
        let module = self.module.as_str();
        let fields = &self.fields;
        match level {
            LogLevel::Error => error!(module, ?fields, "{}", message),
            LogLevel::Warn => warn!(module, ?fields, "{}", message),
            LogLevel::Info => info!(module, ?fields, "{}", message),
            LogLevel::Debug => debug!(module, ?fields, "{}", message),
            LogLevel::Trace => trace!(module, ?fields, "{}", message),
        }
        message
    }

    pub fn info(&self, message: impl AsRef<str>) -> String {
        self.log(LogLevel::Info, message)
    }

    pub fn warn(&self, message: impl AsRef<str>) -> String {
        self.log(LogLevel::Warn, message)
    }

    pub fn error(&self, message: impl AsRef<str>) -> String {
        self.log(LogLevel::Error, message)
    }

    pub fn debug(&self, message: impl AsRef<str>) -> String {
        self.log(LogLevel::Debug, message)
    }
}
