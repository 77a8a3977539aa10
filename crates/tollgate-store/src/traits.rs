//! Store traits.

use std::time::Duration;

use async_trait::async_trait;

use crate::StoreResult;
use crate::command::{Command, Reply};
use crate::error::StoreError;
use crate::stats::StoreStats;

/// Thin client over a remote key-value store.
///
/// The only required primitive is [`execute`](Self::execute): send a batch
/// of commands in one round trip and return one result per command, in the
/// order the commands were given. A failed command never prevents the
/// others from running. The outer `Err` is reserved for failures where
/// nothing could be sent at all (pool exhausted, connection refused,
/// timeout).
///
/// Batches are *not* transactions: each command is atomic on its own key
/// but there is no isolation or rollback across commands.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Short backend identifier for logs and stats ("redis", "memory").
    fn backend_name(&self) -> &'static str;

    /// Executes a batch of commands in a single round trip.
    async fn execute(&self, commands: Vec<Command>) -> StoreResult<Vec<StoreResult<Reply>>>;

    /// Executes a single command.
    async fn run(&self, command: Command) -> StoreResult<Reply> {
        let mut replies = self.execute(vec![command]).await?;
        match replies.pop() {
            Some(reply) if replies.is_empty() => reply,
            _ => Err(StoreError::protocol("expected exactly one reply")),
        }
    }

    /// Polls server-level statistics (memory, key count, throughput).
    async fn stats(&self) -> StoreResult<StoreStats> {
        let mut replies = self.execute(vec![Command::Info, Command::DbSize]).await?;
        let key_count = replies.pop().unwrap_or(Ok(Reply::Nil))?.into_int()?;
        let info = replies
            .pop()
            .unwrap_or(Ok(Reply::Nil))?
            .into_string()?
            .unwrap_or_default();
        let mut stats = StoreStats::from_info(&info);
        stats.key_count = key_count.max(0) as u64;
        Ok(stats)
    }

    /// Releases the underlying connections.
    async fn close(&self) {}
}

/// Typed helpers over [`KeyValueStore::run`].
///
/// Blanket-implemented for every store, including `dyn KeyValueStore`.
#[async_trait]
pub trait StoreExt: KeyValueStore {
    async fn ping(&self) -> StoreResult<()> {
        self.run(Command::Ping).await.map(|_| ())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.run(Command::get(key)).await?.into_bytes()
    }

    async fn set_px(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<()> {
        self.run(Command::set_px(key, value, ttl)).await.map(|_| ())
    }

    /// Returns `true` when the key was absent and has been written.
    async fn set_nx_px(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<bool> {
        self.run(Command::set_nx_px(key, value, ttl))
            .await?
            .into_bool()
    }

    /// Returns `true` when the key existed and has been overwritten.
    async fn set_xx_px(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<bool> {
        self.run(Command::set_xx_px(key, value, ttl))
            .await?
            .into_bool()
    }

    /// Returns the number of keys removed.
    async fn del(&self, key: &str) -> StoreResult<i64> {
        self.run(Command::del(key)).await?.into_int()
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.run(Command::exists(key)).await?.into_bool()
    }

    /// Returns `true` when the key existed and its TTL was set.
    async fn pexpire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.run(Command::pexpire(key, ttl)).await?.into_bool()
    }

    /// Remaining TTL in milliseconds; `-2` for a missing key, `-1` for no TTL.
    async fn pttl(&self, key: &str) -> StoreResult<i64> {
        self.run(Command::pttl(key)).await?.into_int()
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        self.run(Command::incr(key)).await?.into_int()
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        self.run(Command::smembers(key)).await?.into_strings()
    }

    async fn scard(&self, key: &str) -> StoreResult<u64> {
        self.run(Command::scard(key))
            .await?
            .into_int()
            .map(|n| n.max(0) as u64)
    }

    async fn hgetall(&self, key: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        self.run(Command::hgetall(key)).await?.into_pairs()
    }

    /// Returns `true` when the key held `expected` and was deleted.
    async fn compare_and_delete(&self, key: &str, expected: Vec<u8>) -> StoreResult<bool> {
        self.run(Command::compare_and_delete(key, expected))
            .await?
            .into_bool()
    }

    /// Collects every key matching `pattern` using cursor-based `SCAN`.
    async fn scan_match(&self, pattern: &str, count: usize) -> StoreResult<Vec<String>> {
        let mut cursor = 0u64;
        let mut keys = Vec::new();
        loop {
            let (next, batch) = self
                .run(Command::scan(cursor, pattern, count))
                .await?
                .into_scan()?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

impl<T: KeyValueStore + ?Sized> StoreExt for T {}
