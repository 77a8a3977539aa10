//! # tollgate-store
//!
//! Store abstraction layer for tollgate.
//!
//! This crate defines the contract every key-value backend implements and
//! the pieces built directly on top of it. It does not contain any backend
//! implementations - those live in `tollgate-store-memory` and
//! `tollgate-store-redis`.
//!
//! ## Overview
//!
//! - [`KeyValueStore`] - one required primitive, `execute(commands)`, that
//!   sends a batch in a single round trip and returns per-command results
//! - [`StoreExt`] - typed helpers (`get`, `set_px`, `compare_and_delete`, ...)
//! - [`PipelineExecutor`] - batch execution reporting per-command failures
//! - [`InstrumentedStore`] - wrapper feeding an [`OperationObserver`]
//! - [`StoreStats`] - server statistics parsed from `INFO`
//!
//! ## Example
//!
//! ```ignore
//! use tollgate_store::{Command, Pipeline, PipelineExecutor};
//!
//! let executor = PipelineExecutor::new(store.clone());
//! let outcome = executor
//!     .execute(
//!         Pipeline::new()
//!             .with(Command::set_px("session:42", payload, ttl))
//!             .with(Command::sadd("tag:active_sessions", "42")),
//!     )
//!     .await;
//! if !outcome.success {
//!     // inspect outcome.failed_indices()
//! }
//! ```

mod command;
mod error;
pub mod instrumented;
pub mod pipeline;
mod stats;
mod traits;

pub use command::{Command, CommandKind, Reply, SetCondition};
pub use error::{ErrorCategory, StoreError};
pub use instrumented::{InstrumentedStore, OperationObserver, OperationRecord};
pub use pipeline::{Pipeline, PipelineExecutor, PipelineOutcome};
pub use stats::StoreStats;
pub use traits::{KeyValueStore, StoreExt};

/// Type alias for a store result.
pub type StoreResult<T> = Result<T, StoreError>;

/// Type alias for a shared store trait object.
pub type DynStore = std::sync::Arc<dyn KeyValueStore>;
