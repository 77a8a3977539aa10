//! Periodic defensive sweep.
//!
//! TTLs do most of the work. The sweep repairs what TTLs cannot: index
//! members whose primary key already expired, and keys in the blacklist,
//! rate-limit and OTP families that lost their TTL and would otherwise live
//! forever.

use std::future::Future;
use std::time::{Duration, Instant};

use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tollgate_store::{Command, DynStore, Pipeline, PipelineExecutor, Reply, StoreExt};
use tracing::{debug, error, info};

use crate::error::TollgateResult;
use crate::keys;
use crate::metrics::names;
use crate::revocation::TokenRevocationRegistry;
use crate::session::SessionManager;

async fn step(
    name: &'static str,
    work: impl Future<Output = TollgateResult<usize>>,
    failed: &mut usize,
) -> usize {
    match work.await {
        Ok(removed) => removed,
        Err(e) => {
            error!(step = name, error = %e, "Cleanup step failed");
            *failed += 1;
            0
        }
    }
}

/// What one sweep removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupReport {
    pub stale_sessions: usize,
    pub pruned_revocations: usize,
    pub orphaned_blacklist_keys: usize,
    pub orphaned_rate_limits: usize,
    pub expired_otps: usize,
    /// Sweep steps that failed and were skipped.
    pub failed_steps: usize,
    pub duration: Duration,
}

impl CleanupReport {
    pub fn removed(&self) -> usize {
        self.stale_sessions
            + self.pruned_revocations
            + self.orphaned_blacklist_keys
            + self.orphaned_rate_limits
            + self.expired_otps
    }
}

#[derive(Clone)]
pub struct CleanupScheduler {
    store: DynStore,
    pipeline: PipelineExecutor,
    sessions: SessionManager,
    revocations: TokenRevocationRegistry,
    scan_count: usize,
}

impl CleanupScheduler {
    pub fn new(
        store: DynStore,
        sessions: SessionManager,
        revocations: TokenRevocationRegistry,
        scan_count: usize,
    ) -> Self {
        Self {
            pipeline: PipelineExecutor::new(store.clone()),
            store,
            sessions,
            revocations,
            scan_count: scan_count.max(1),
        }
    }

    /// Runs one sweep. Never fails: a failing step is logged and skipped.
    pub async fn run_once(&self) -> CleanupReport {
        let started = Instant::now();
        let mut report = CleanupReport::default();

        let failed = &mut report.failed_steps;
        let stale_sessions = step("sessions", self.sessions.reconcile_index(), failed).await;
        let pruned_revocations = step("revocations", self.revocations.cleanup(), failed).await;
        let orphaned_blacklist_keys =
            step("blacklist", self.sweep_untimed(keys::BLACKLIST_PATTERN), failed).await;
        let orphaned_rate_limits =
            step("rate_limit", self.sweep_untimed(keys::RATE_LIMIT_PATTERN), failed).await;
        let expired_otps = step("otp", self.sweep_untimed(keys::OTP_PATTERN), failed).await;

        report.stale_sessions = stale_sessions;
        report.pruned_revocations = pruned_revocations;
        report.orphaned_blacklist_keys = orphaned_blacklist_keys;
        report.orphaned_rate_limits = orphaned_rate_limits;
        report.expired_otps = expired_otps;
        report.duration = started.elapsed();

        counter!(names::CLEANUP_RUNS_TOTAL).increment(1);
        counter!(names::CLEANUP_REMOVED_TOTAL).increment(report.removed() as u64);
        info!(
            stale_sessions = report.stale_sessions,
            pruned_revocations = report.pruned_revocations,
            orphaned_blacklist_keys = report.orphaned_blacklist_keys,
            orphaned_rate_limits = report.orphaned_rate_limits,
            expired_otps = report.expired_otps,
            failed_steps = report.failed_steps,
            duration_ms = report.duration.as_millis() as u64,
            "Cleanup sweep finished"
        );
        report
    }

    /// Deletes keys matching `pattern` that have no TTL.
    ///
    /// Every key in the swept families gets its TTL in the same command
    /// that creates it (`SET PX`, or the single-step rate-limit commands),
    /// so a key without one was never written by this crate's managers or
    /// lost its expiry; deleting it cannot race a live window.
    async fn sweep_untimed(&self, pattern: &str) -> TollgateResult<usize> {
        let keys = self.store.scan_match(pattern, self.scan_count).await?;
        let mut orphans = Vec::new();

        for chunk in keys.chunks(self.scan_count) {
            let pipeline: Pipeline = chunk.iter().map(|key| Command::pttl(key)).collect();
            let outcome = self.pipeline.execute(pipeline).await;
            for (key, result) in chunk.iter().zip(outcome.results) {
                if matches!(result, Some(Reply::Int(-1))) {
                    orphans.push(key.clone());
                }
            }
        }

        if orphans.is_empty() {
            return Ok(0);
        }

        debug!(pattern, count = orphans.len(), "Deleting keys without TTL");
        let removed = self
            .store
            .run(Command::del_many(orphans))
            .await?
            .into_int()?;
        Ok(removed.max(0) as usize)
    }

    /// Spawns the sweep loop. Runs every `interval` until `cancel` fires;
    /// the next sweep is scheduled regardless of how the previous one went.
    pub fn spawn(self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so startup does
            // not begin with a sweep.
            ticker.tick().await;

            info!(interval_secs = interval.as_secs(), "Cleanup scheduler started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }
            info!("Cleanup scheduler stopped");
        })
    }
}
