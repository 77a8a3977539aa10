//! Redis store backend for tollgate.
//!
//! [`RedisStore`] implements [`tollgate_store::KeyValueStore`] by sending
//! each batch of commands as one Redis pipeline over a pooled connection.
//! Per-command server errors (e.g. `WRONGTYPE`) are reported for that
//! command only; the other replies in the batch are still returned.
//!
//! Compare-and-delete runs as a server-side Lua script so ownership checks
//! and deletion happen atomically.

mod config;
mod convert;
mod store;

pub use config::RedisStoreConfig;
pub use store::RedisStore;
