//! # tollgate-server
//!
//! Session and access-control core in front of a key-value store.
//!
//! - [`SessionManager`] - sessions with sliding TTLs and an active index
//! - [`TokenRevocationRegistry`] - token blacklist keyed by fingerprint
//! - [`RateLimiter`] - sliding-window and fixed-window throttling
//! - [`DistributedLock`] - ownership-checked mutual exclusion
//! - [`OtpStore`] - hashed one-time passcodes with attempt limits
//! - [`MetricsCollector`] - operation counters, history and exports
//! - [`CleanupScheduler`] - periodic index and orphan-key sweep
//!
//! [`Tollgate`] wires all of them over one store and owns their
//! background tasks.
//!
//! ## Failure policy
//!
//! Revocation and rate-limit checks are reads on the request path; when the
//! store is unreachable they fall back to a configurable default (fail-open
//! unless configured otherwise) and log a warning. Session writes and lock
//! operations surface store errors to the caller.

pub mod cleanup;
mod clock;
pub mod config;
pub mod error;
pub mod keys;
pub mod lock;
pub mod metrics;
pub mod observability;
pub mod otp;
pub mod rate_limit;
pub mod revocation;
pub mod service;
pub mod session;

pub use cleanup::{CleanupReport, CleanupScheduler};
pub use config::AppConfig;
pub use error::{TollgateError, TollgateResult};
pub use lock::{DistributedLock, LockGuard, LockToken};
pub use metrics::{ExportFormat, MetricsCollector, MetricsExport, MetricsSnapshot, MetricsSummary};
pub use observability::{init_tracing, shutdown_tracing};
pub use otp::{OtpStore, OtpVerification};
pub use rate_limit::{RateLimitAlgorithm, RateLimitKind, RateLimitResult, RateLimiter};
pub use revocation::{RevocationRecord, TokenRevocationRegistry, fingerprint};
pub use service::Tollgate;
pub use session::{SessionActivity, SessionData, SessionManager};
