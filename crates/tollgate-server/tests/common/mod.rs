#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tollgate_server::Tollgate;
use tollgate_server::config::AppConfig;
use tollgate_store::{Command, DynStore, KeyValueStore, Reply, StoreError, StoreResult};
use tollgate_store_memory::MemoryStore;

pub fn memory_store() -> DynStore {
    Arc::new(MemoryStore::new())
}

/// A store whose every round trip fails as if the server were down.
pub struct UnreachableStore;

#[async_trait]
impl KeyValueStore for UnreachableStore {
    fn backend_name(&self) -> &'static str {
        "unreachable"
    }

    async fn execute(&self, _commands: Vec<Command>) -> StoreResult<Vec<StoreResult<Reply>>> {
        Err(StoreError::connection("connection refused"))
    }
}

pub fn unreachable_store() -> DynStore {
    Arc::new(UnreachableStore)
}

type Trigger = Box<dyn Fn(&Command) -> bool + Send + Sync>;

/// Runs `interleaved` against the inner store once, immediately before the
/// first batch containing a command that matches the trigger. Simulates
/// another client acting between two round trips of the caller.
pub struct InterleavingStore {
    inner: DynStore,
    trigger: Trigger,
    interleaved: Mutex<Option<Vec<Command>>>,
}

impl InterleavingStore {
    pub fn new(
        inner: DynStore,
        trigger: impl Fn(&Command) -> bool + Send + Sync + 'static,
        interleaved: Vec<Command>,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner,
            trigger: Box::new(trigger),
            interleaved: Mutex::new(Some(interleaved)),
        })
    }

    /// Whether the interleaved commands have run.
    pub fn fired(&self) -> bool {
        self.interleaved.lock().is_none()
    }
}

#[async_trait]
impl KeyValueStore for InterleavingStore {
    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    async fn execute(&self, commands: Vec<Command>) -> StoreResult<Vec<StoreResult<Reply>>> {
        let pending = if commands.iter().any(|c| (self.trigger)(c)) {
            self.interleaved.lock().take()
        } else {
            None
        };
        if let Some(interleaved) = pending {
            for reply in self.inner.execute(interleaved).await? {
                reply?;
            }
        }
        self.inner.execute(commands).await
    }
}

pub async fn service() -> Tollgate {
    service_with(AppConfig::default()).await
}

pub async fn service_with(config: AppConfig) -> Tollgate {
    Tollgate::with_store(config, memory_store())
        .await
        .expect("service over memory store")
}

pub async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
