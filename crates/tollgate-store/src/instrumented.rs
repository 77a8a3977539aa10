//! InstrumentedStore - a store wrapper that reports every command outcome.
//!
//! The wrapper delegates to an inner store and hands one [`OperationRecord`]
//! per command to an [`OperationObserver`]. Observers must not block: the
//! record is produced on the caller's hot path.
//!
//! # Example
//!
//! ```ignore
//! let store = InstrumentedStore::new(redis_store, metrics_collector);
//! store.run(Command::get("session:42")).await?;
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;

use crate::StoreResult;
use crate::command::{Command, CommandKind, Reply};
use crate::stats::StoreStats;
use crate::traits::KeyValueStore;

/// Outcome of a single store command.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    /// Command name (`GET`, `SET`, ...).
    pub operation: &'static str,
    pub kind: CommandKind,
    pub key: Option<String>,
    pub success: bool,
    /// `Some(true)` for a read that found a value, `Some(false)` for a miss.
    pub hit: Option<bool>,
    /// Round-trip time of the batch the command travelled in.
    pub duration: Duration,
    pub error: Option<String>,
    pub recorded_at: SystemTime,
}

impl OperationRecord {
    pub fn new(command: &Command, result: &StoreResult<Reply>, duration: Duration) -> Self {
        let kind = command.kind();
        let hit = match (kind, result) {
            (CommandKind::Read, Ok(reply)) => Some(reply.is_hit()),
            _ => None,
        };
        Self {
            operation: command.name(),
            kind,
            key: command.key().map(str::to_string),
            success: result.is_ok(),
            hit,
            duration,
            error: result.as_ref().err().map(ToString::to_string),
            recorded_at: SystemTime::now(),
        }
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }
}

/// Receiver of operation records.
pub trait OperationObserver: Send + Sync {
    fn observe(&self, record: OperationRecord);
}

/// A store wrapper that reports each command to an observer.
pub struct InstrumentedStore {
    inner: Arc<dyn KeyValueStore>,
    observer: Arc<dyn OperationObserver>,
}

impl InstrumentedStore {
    pub fn new(inner: Arc<dyn KeyValueStore>, observer: Arc<dyn OperationObserver>) -> Self {
        Self { inner, observer }
    }

    /// Get a reference to the inner store.
    pub fn inner(&self) -> &Arc<dyn KeyValueStore> {
        &self.inner
    }
}

#[async_trait]
impl KeyValueStore for InstrumentedStore {
    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    async fn execute(&self, commands: Vec<Command>) -> StoreResult<Vec<StoreResult<Reply>>> {
        let started = Instant::now();
        let outcome = self.inner.execute(commands.clone()).await;
        let elapsed = started.elapsed();

        match &outcome {
            Ok(replies) => {
                for (command, reply) in commands.iter().zip(replies) {
                    self.observer
                        .observe(OperationRecord::new(command, reply, elapsed));
                }
            }
            Err(e) => {
                let failed = Err(e.clone());
                for command in &commands {
                    self.observer
                        .observe(OperationRecord::new(command, &failed, elapsed));
                }
            }
        }

        outcome
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        self.inner.stats().await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}
