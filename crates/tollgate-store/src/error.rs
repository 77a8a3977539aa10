//! Store error types.
//!
//! Errors are split by what the caller can do about them: connection and
//! timeout failures are transient infrastructure problems, while operation
//! and protocol errors belong to a single command.

use std::fmt;
use std::time::Duration;

/// Errors that can occur while talking to the key-value store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or the connection broke mid-request.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection failure.
        message: String,
    },

    /// The store did not answer within the configured command timeout.
    #[error("Operation timed out after {elapsed_ms}ms")]
    Timeout {
        /// How long the caller waited before giving up.
        elapsed_ms: u64,
    },

    /// A single command was rejected by the store (e.g. wrong value type).
    #[error("Operation error: {message}")]
    Operation {
        /// Description of the rejected command.
        message: String,
    },

    /// The store answered with a reply shape the caller did not expect.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the unexpected reply.
        message: String,
    },
}

impl StoreError {
    /// Creates a new `Connection` error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout(elapsed: Duration) -> Self {
        Self::Timeout {
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Creates a new `Operation` error.
    #[must_use]
    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation {
            message: message.into(),
        }
    }

    /// Creates a new `Protocol` error.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Error returned when a key holds a value of another type.
    #[must_use]
    pub fn wrong_type() -> Self {
        Self::operation("WRONGTYPE Operation against a key holding the wrong kind of value")
    }

    /// Returns `true` for connection and timeout failures.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => ErrorCategory::Infrastructure,
            Self::Operation { .. } => ErrorCategory::Operation,
            Self::Protocol { .. } => ErrorCategory::Protocol,
        }
    }
}

/// Categories of store errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Store unreachable or too slow.
    Infrastructure,
    /// Command rejected by the store.
    Operation,
    /// Unexpected reply shape.
    Protocol,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Operation => write!(f, "operation"),
            Self::Protocol => write!(f, "protocol"),
        }
    }
}
