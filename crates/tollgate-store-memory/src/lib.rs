//! In-memory store backend for tollgate.
//!
//! [`MemoryStore`] implements [`tollgate_store::KeyValueStore`] on top of a
//! `DashMap`, following the command semantics of Redis closely enough that
//! every manager in the control core behaves identically against it. It is
//! used for single-instance deployments and throughout the test suites.
//!
//! Data lives only as long as the process; nothing is shared between
//! instances, so locks and rate limits taken against it are local.

mod glob;
mod store;

pub use store::MemoryStore;
