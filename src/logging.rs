//! Worker-wide log stream forwarded to connected tabs.
//!
//! The coordinator publishes [`LogRecord`]s onto a [`LogBus`]; each
//! connected client subscribes and forwards every record to its tab as
//! a `logEvent` notification. The bus is a plain broadcast fan-out: a
//! slow subscriber drops records, it never blocks the publisher.
//!
//! Records are also mirrored to [`tracing`] so operator logs see the
//! same diagnostics as the tabs do.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ============================================================================
// Constants
// ============================================================================

/// Buffered records per subscriber before the oldest are dropped.
const LOG_BUS_CAPACITY: usize = 256;

// ============================================================================
// LogLevel
// ============================================================================

/// Severity of a forwarded log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Fine-grained tracing.
    Trace,
    /// Debugging detail.
    Debug,
    /// Normal operation.
    Info,
    /// Recoverable problem.
    Warn,
    /// Failure.
    Error,
}

impl LogLevel {
    /// Returns the level name as it appears in formatted lines.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// LogRecord
// ============================================================================

/// One record on the worker-wide log stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Name of the logger that produced the record.
    pub logger: String,
    /// Severity.
    pub level: LogLevel,
    /// Time the record was produced.
    pub timestamp: DateTime<Utc>,
    /// Human-readable message.
    pub message: String,
    /// Optional error description, rendered on its own line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Optional stack trace, rendered after the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl LogRecord {
    /// Creates a record with the current timestamp and no error context.
    #[must_use]
    pub fn new(level: LogLevel, logger: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            logger: logger.into(),
            level,
            timestamp: Utc::now(),
            message: message.into(),
            error: None,
            stack: None,
        }
    }

    /// Attaches an error description.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attaches a stack trace.
    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Formats the record as the single line sent to tabs.
    ///
    /// Shape: `[<logger>] <LEVEL>: <timestamp>: <message>`, followed by
    /// the error and stack trace on subsequent lines when present.
    #[must_use]
    pub fn format_line(&self) -> String {
        let mut line = format!(
            "[{}] {}: {}: {}",
            self.logger,
            self.level,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.message
        );
        if let Some(error) = &self.error {
            line.push('\n');
            line.push_str(error);
        }
        if let Some(stack) = &self.stack {
            line.push('\n');
            line.push_str(stack);
        }
        line
    }
}

// ============================================================================
// LogBus
// ============================================================================

/// Broadcast fan-out of [`LogRecord`]s to per-client subscribers.
///
/// Cheap to clone; all clones publish into the same stream.
#[derive(Clone)]
pub struct LogBus {
    sender: broadcast::Sender<LogRecord>,
}

impl Default for LogBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBus {
    /// Creates a new bus with the default per-subscriber capacity.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(LOG_BUS_CAPACITY);
        Self { sender }
    }

    /// Subscribes to the stream from this point on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LogRecord> {
        self.sender.subscribe()
    }

    /// Returns the number of live subscribers.
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publishes a record to all subscribers and mirrors it to `tracing`.
    ///
    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, record: LogRecord) {
        match record.level {
            LogLevel::Trace => {
                tracing::trace!(logger = %record.logger, message = %record.message, "log record");
            }
            LogLevel::Debug => {
                tracing::debug!(logger = %record.logger, message = %record.message, "log record");
            }
            LogLevel::Info => {
                tracing::info!(logger = %record.logger, message = %record.message, "log record");
            }
            LogLevel::Warn => {
                tracing::warn!(logger = %record.logger, message = %record.message, "log record");
            }
            LogLevel::Error => {
                tracing::error!(logger = %record.logger, message = %record.message, "log record");
            }
        }
        let _ = self.sender.send(record);
    }

    /// Publishes a warning record.
    pub fn warn(&self, logger: impl Into<String>, message: impl Into<String>) {
        self.publish(LogRecord::new(LogLevel::Warn, logger, message));
    }
}

impl fmt::Debug for LogBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogBus")
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_names() {
        assert_eq!(LogLevel::Warn.as_str(), "WARN");
        assert_eq!(LogLevel::Error.to_string(), "ERROR");
    }

    #[test]
    fn test_format_line_basic() {
        let record = LogRecord::new(LogLevel::Info, "SharedSync", "connected");
        let line = record.format_line();
        assert!(line.starts_with("[SharedSync] INFO: "));
        assert!(line.ends_with(": connected"));
        assert_eq!(line.lines().count(), 1);
    }

    #[test]
    fn test_format_line_with_error_and_stack() {
        let record = LogRecord::new(LogLevel::Error, "SharedSync", "upload failed")
            .with_error("Error: boom")
            .with_stack("at upload (worker.rs:1)");
        let line = record.format_line();
        let lines: Vec<&str> = line.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "Error: boom");
        assert_eq!(lines[2], "at upload (worker.rs:1)");
    }

    #[tokio::test]
    async fn test_bus_fanout() {
        let bus = LogBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.warn("Runner", "something odd");

        let ra = a.recv().await.expect("subscriber a");
        let rb = b.recv().await.expect("subscriber b");
        assert_eq!(ra.message, "something odd");
        assert_eq!(rb.level, LogLevel::Warn);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = LogBus::new();
        // Should not panic or error.
        bus.publish(LogRecord::new(LogLevel::Debug, "Runner", "quiet"));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
