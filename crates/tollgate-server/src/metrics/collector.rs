use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use metrics::{counter, gauge, histogram};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tollgate_store::{CommandKind, DynStore, OperationObserver, OperationRecord, StoreStats};
use tracing::{debug, warn};

use super::names;
use crate::config::MetricsConfig;

enum Message {
    Record(OperationRecord),
    Flush(oneshot::Sender<()>),
}

/// Counters derived from the recorded operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
    pub total_operations: u64,
    pub average_latency_ms: f64,
    /// `hits / (hits + misses)`, or 0 when nothing was read.
    pub hit_rate: f64,
    pub operations_by_type: BTreeMap<String, u64>,
    /// Records lost because the queue was full.
    pub dropped_records: u64,
}

#[derive(Default)]
struct MetricsState {
    hits: u64,
    misses: u64,
    sets: u64,
    deletes: u64,
    errors: u64,
    total: u64,
    average_latency_ms: f64,
    by_type: BTreeMap<&'static str, u64>,
    history: VecDeque<OperationRecord>,
}

impl MetricsState {
    fn apply(&mut self, record: OperationRecord, capacity: usize) {
        self.total += 1;
        *self.by_type.entry(record.operation).or_default() += 1;

        match (record.kind, record.hit) {
            (CommandKind::Read, Some(true)) => self.hits += 1,
            (CommandKind::Read, Some(false)) => self.misses += 1,
            (CommandKind::Write, _) => self.sets += 1,
            (CommandKind::Delete, _) => self.deletes += 1,
            _ => {}
        }
        if !record.success {
            self.errors += 1;
        }

        // Incremental mean, no running sum to overflow.
        self.average_latency_ms +=
            (record.duration_ms() - self.average_latency_ms) / self.total as f64;

        if self.history.len() >= capacity {
            self.history.pop_front();
        }
        self.history.push_back(record);
    }
}

struct Shared {
    state: RwLock<MetricsState>,
    store_stats: RwLock<Option<StoreStats>>,
    dropped: AtomicU64,
    history_capacity: usize,
    slow_threshold: Duration,
}

/// Collects store operation outcomes off the caller's hot path.
///
/// Recording is a non-blocking `try_send` into a bounded queue; a worker
/// task applies the records. When the queue is full the record is dropped
/// and counted.
#[derive(Clone)]
pub struct MetricsCollector {
    sender: mpsc::Sender<Message>,
    shared: Arc<Shared>,
}

impl MetricsCollector {
    /// Creates the collector and spawns its worker on the current runtime.
    ///
    /// The worker exits once every clone of the collector is dropped.
    pub fn spawn(config: &MetricsConfig) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let shared = Arc::new(Shared {
            state: RwLock::new(MetricsState::default()),
            store_stats: RwLock::new(None),
            dropped: AtomicU64::new(0),
            history_capacity: config.history_capacity.max(1),
            slow_threshold: config.slow_threshold(),
        });

        let worker = tokio::spawn(run_worker(receiver, shared.clone()));
        (Self { sender, shared }, worker)
    }

    pub fn record_operation(&self, record: OperationRecord) {
        if self.sender.try_send(Message::Record(record)).is_err() {
            let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            counter!(names::METRICS_DROPPED_TOTAL).increment(1);
            if dropped.is_power_of_two() {
                warn!(dropped, "Metrics queue full, dropping operation records");
            }
        }
    }

    /// Waits until every record queued before this call has been applied.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(Message::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.shared.state.read();
        let reads = state.hits + state.misses;
        MetricsSnapshot {
            hits: state.hits,
            misses: state.misses,
            sets: state.sets,
            deletes: state.deletes,
            errors: state.errors,
            total_operations: state.total,
            average_latency_ms: state.average_latency_ms,
            hit_rate: if reads == 0 {
                0.0
            } else {
                state.hits as f64 / reads as f64
            },
            operations_by_type: state
                .by_type
                .iter()
                .map(|(op, n)| ((*op).to_string(), *n))
                .collect(),
            dropped_records: self.shared.dropped.load(Ordering::Relaxed),
        }
    }

    /// Clears counters, history and the dropped count.
    pub fn reset(&self) {
        *self.shared.state.write() = MetricsState::default();
        self.shared.dropped.store(0, Ordering::Relaxed);
        debug!("Metrics reset");
    }

    pub fn history_len(&self) -> usize {
        self.shared.state.read().history.len()
    }

    pub fn slow_threshold(&self) -> Duration {
        self.shared.slow_threshold
    }

    /// Operations recorded within the last `window`, oldest first.
    pub fn recent_operations(&self, window: Duration) -> Vec<OperationRecord> {
        let cutoff = SystemTime::now()
            .checked_sub(window)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        self.shared
            .state
            .read()
            .history
            .iter()
            .filter(|r| r.recorded_at >= cutoff)
            .cloned()
            .collect()
    }

    /// Most recent failed operations, newest first.
    pub fn failed_operations(&self, limit: usize) -> Vec<OperationRecord> {
        self.newest(limit, |r| !r.success)
    }

    /// Most recent operations slower than `threshold`, newest first.
    pub fn slow_operations(&self, threshold: Duration, limit: usize) -> Vec<OperationRecord> {
        self.newest(limit, |r| r.duration > threshold)
    }

    /// Most recent operations of one command type (`GET`, `SET`, ...),
    /// newest first.
    pub fn operations_by_type(&self, operation: &str, limit: usize) -> Vec<OperationRecord> {
        self.newest(limit, |r| r.operation.eq_ignore_ascii_case(operation))
    }

    fn newest(&self, limit: usize, filter: impl Fn(&OperationRecord) -> bool) -> Vec<OperationRecord> {
        self.shared
            .state
            .read()
            .history
            .iter()
            .rev()
            .filter(|r| filter(r))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Latest polled store statistics.
    pub fn store_stats(&self) -> Option<StoreStats> {
        self.shared.store_stats.read().clone()
    }

    pub fn update_store_stats(&self, stats: StoreStats) {
        gauge!(names::STORE_USED_MEMORY_BYTES).set(stats.used_memory_bytes as f64);
        gauge!(names::STORE_KEYS).set(stats.key_count as f64);
        gauge!(names::STORE_OPS_PER_SEC).set(stats.ops_per_sec);
        gauge!(names::STORE_CONNECTED_CLIENTS).set(stats.connected_clients as f64);
        gauge!(names::STORE_EVICTED_KEYS).set(stats.evicted_keys as f64);
        gauge!(names::STORE_EXPIRED_KEYS).set(stats.expired_keys as f64);
        *self.shared.store_stats.write() = Some(stats);
    }

    /// Polls store statistics once.
    pub async fn collect(&self, store: &DynStore) {
        match store.stats().await {
            Ok(stats) => {
                debug!(keys = stats.key_count, "Store statistics collected");
                self.update_store_stats(stats);
            }
            Err(e) => warn!(error = %e, "Failed to collect store statistics"),
        }
    }

    /// Spawns the periodic statistics poll.
    ///
    /// Runs until `cancel` fires. A slow or failing poll never blocks store
    /// operations; a missed tick is skipped rather than bursted.
    pub fn spawn_periodic_collect(
        &self,
        store: DynStore,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let collector = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => collector.collect(&store).await,
                }
            }
            debug!("Periodic store statistics collection stopped");
        })
    }
}

impl OperationObserver for MetricsCollector {
    fn observe(&self, record: OperationRecord) {
        self.record_operation(record);
    }
}

async fn run_worker(mut receiver: mpsc::Receiver<Message>, shared: Arc<Shared>) {
    while let Some(message) = receiver.recv().await {
        match message {
            Message::Record(record) => {
                mirror(&record, shared.slow_threshold);
                shared.state.write().apply(record, shared.history_capacity);
            }
            Message::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Metrics worker stopped");
}

fn mirror(record: &OperationRecord, slow_threshold: Duration) {
    let status = if record.success { "ok" } else { "error" };
    counter!(
        names::STORE_OPERATIONS_TOTAL,
        "operation" => record.operation,
        "status" => status
    )
    .increment(1);
    histogram!(
        names::STORE_OPERATION_DURATION_SECONDS,
        "operation" => record.operation
    )
    .record(record.duration.as_secs_f64());

    match record.hit {
        Some(true) => counter!(names::CACHE_HITS_TOTAL).increment(1),
        Some(false) => counter!(names::CACHE_MISSES_TOTAL).increment(1),
        None => {}
    }
    if !record.success {
        counter!(names::STORE_OPERATION_ERRORS_TOTAL, "operation" => record.operation).increment(1);
    }
    if record.duration > slow_threshold {
        debug!(
            operation = record.operation,
            key = record.key.as_deref().unwrap_or(""),
            duration_ms = record.duration_ms(),
            "Slow store operation"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(operation: &'static str, kind: CommandKind, hit: Option<bool>, ms: u64) -> OperationRecord {
        OperationRecord {
            operation,
            kind,
            key: Some("k".into()),
            success: true,
            hit,
            duration: Duration::from_millis(ms),
            error: None,
            recorded_at: SystemTime::now(),
        }
    }

    #[test]
    fn test_state_counts_and_mean() {
        let mut state = MetricsState::default();
        state.apply(record("GET", CommandKind::Read, Some(true), 10), 10);
        state.apply(record("GET", CommandKind::Read, Some(false), 20), 10);
        state.apply(record("SET", CommandKind::Write, None, 30), 10);
        state.apply(record("DEL", CommandKind::Delete, None, 40), 10);

        assert_eq!((state.hits, state.misses, state.sets, state.deletes), (1, 1, 1, 1));
        assert_eq!(state.total, 4);
        assert!((state.average_latency_ms - 25.0).abs() < 1e-9);
        assert_eq!(state.by_type.get("GET"), Some(&2));
    }

    #[test]
    fn test_history_drops_oldest() {
        let mut state = MetricsState::default();
        for ms in 0..5 {
            state.apply(record("GET", CommandKind::Read, Some(true), ms), 3);
        }
        let kept: Vec<_> = state.history.iter().map(|r| r.duration.as_millis()).collect();
        assert_eq!(kept, vec![2, 3, 4]);
    }
}
