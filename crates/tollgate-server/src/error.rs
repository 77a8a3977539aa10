//! Error types for the control core.
//!
//! Rate-limit denial is not an error (`allowed == false`) and absent keys
//! are `None`. Everything else a caller may need to react to lives here.

use tollgate_store::{PipelineOutcome, StoreError};

/// Errors surfaced by the tollgate managers and service.
#[derive(Debug, thiserror::Error)]
pub enum TollgateError {
    /// The store failed for the whole call.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The lock is currently held by someone else.
    #[error("Lock unavailable: {resource}")]
    LockUnavailable {
        /// The contended resource.
        resource: String,
    },

    /// Some commands of a pipelined write did not apply.
    ///
    /// Pipelines are not transactions: the commands that succeeded stay
    /// applied. Callers treat the operation as failed and retry or clean up.
    #[error("{operation} partially failed at commands {failed:?}: {cause}")]
    PartialFailure {
        operation: &'static str,
        failed: Vec<usize>,
        cause: String,
    },

    /// A stored payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The service was used before `init` or after `shutdown`.
    #[error("Service not initialized")]
    NotInitialized,
}

impl TollgateError {
    #[must_use]
    pub fn lock_unavailable(resource: impl Into<String>) -> Self {
        Self::LockUnavailable {
            resource: resource.into(),
        }
    }

    /// Builds the error for a pipelined write that did not fully apply.
    ///
    /// When every command failed with a transient error the batch never
    /// reached the store, so the underlying store error is returned as is.
    #[must_use]
    pub fn from_outcome(operation: &'static str, outcome: &PipelineOutcome) -> Self {
        let failed = outcome.failed_indices();
        let first = outcome.first_error().cloned();

        match first {
            Some(error) if failed.len() == outcome.len() && error.is_transient() => {
                Self::Store(error)
            }
            first => Self::PartialFailure {
                operation,
                failed,
                cause: first
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            },
        }
    }

    /// Returns `true` when retrying later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::LockUnavailable { .. } | Self::PartialFailure { .. } => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for TollgateError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for tollgate operations.
pub type TollgateResult<T> = Result<T, TollgateError>;
