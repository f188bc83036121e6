//! Injected logging capability
//!
//! Components receive an `Arc<dyn Logger>` at construction instead of
//! reaching for global state. [`TracingLogger`] forwards to `tracing`;
//! [`MemoryLogger`] keeps entries around for assertions.

use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

/// Severity of a log message
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Fine-grained progress
    Debug,
    /// Normal operation
    Info,
    /// Recoverable problem
    Warn,
    /// Failure
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        })
    }
}

/// Trait for logging backends
pub trait Logger: Send + Sync {
    /// Log a message at the given level
    fn log(&self, level: LogLevel, message: &str);

    /// Log at [`LogLevel::Debug`]
    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    /// Log at [`LogLevel::Info`]
    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    /// Log at [`LogLevel::Warn`]
    fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    /// Log at [`LogLevel::Error`]
    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

/// Forwards to the `tracing` macros under the `keyshelf` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "keyshelf", "{}", message),
            LogLevel::Info => tracing::info!(target: "keyshelf", "{}", message),
            LogLevel::Warn => tracing::warn!(target: "keyshelf", "{}", message),
            LogLevel::Error => tracing::error!(target: "keyshelf", "{}", message),
        }
    }
}

/// No-op logger for when logging is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn log(&self, _level: LogLevel, _message: &str) {}
}

/// A recorded log message
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// When the message was logged
    pub timestamp: SystemTime,
    /// Severity
    pub level: LogLevel,
    /// Message text
    pub message: String,
}

/// In-memory logger for testing
#[derive(Debug, Default)]
pub struct MemoryLogger {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogger {
    /// Create a new in-memory logger
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all logged entries
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Clear all logged entries
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Count entries at a level
    pub fn count_level(&self, level: LogLevel) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.level == level)
            .count()
    }

    /// Whether any entry contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|e| e.message.contains(needle))
    }
}

impl Logger for MemoryLogger {
    fn log(&self, level: LogLevel, message: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LogEntry {
                timestamp: SystemTime::now(),
                level,
                message: message.to_string(),
            });
    }
}
