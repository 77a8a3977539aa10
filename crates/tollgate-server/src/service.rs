//! The service object that owns the store and every manager.
//!
//! One [`Tollgate`] is constructed per process with [`Tollgate::init`] and
//! passed by reference to consumers. There are no ambient globals: the
//! store pool, the metrics worker and the background tasks all live here
//! and stop in [`Tollgate::shutdown`].

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tollgate_store::{DynStore, InstrumentedStore, PipelineExecutor};
use tollgate_store_memory::MemoryStore;
use tollgate_store_redis::RedisStore;
use tracing::info;

use crate::cleanup::{CleanupReport, CleanupScheduler};
use crate::config::{AppConfig, StoreBackend};
use crate::error::{TollgateError, TollgateResult};
use crate::lock::{DistributedLock, LockToken};
use crate::metrics::{ExportFormat, MetricsCollector, MetricsExport, MetricsSummary, render_prometheus};
use crate::otp::{OtpStore, OtpVerification};
use crate::rate_limit::{RateLimitAlgorithm, RateLimitKind, RateLimitResult, RateLimiter};
use crate::revocation::TokenRevocationRegistry;
use crate::session::{SessionData, SessionManager};

pub struct Tollgate {
    config: AppConfig,
    raw_store: DynStore,
    store: DynStore,
    pipeline: PipelineExecutor,
    sessions: SessionManager,
    revocations: TokenRevocationRegistry,
    rate_limiter: RateLimiter,
    locks: DistributedLock,
    otp: OtpStore,
    metrics: MetricsCollector,
    cleanup: CleanupScheduler,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    metrics_worker: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl Tollgate {
    /// Validates `config`, connects the configured store and starts the
    /// background tasks.
    pub async fn init(config: AppConfig) -> TollgateResult<Self> {
        config.validate().map_err(TollgateError::Config)?;

        let store: DynStore = match config.store.backend {
            StoreBackend::Memory => {
                info!("Using in-memory store (state is local to this instance)");
                Arc::new(MemoryStore::new())
            }
            StoreBackend::Redis => Arc::new(RedisStore::connect(&config.store.redis()).await?),
        };

        Self::with_store(config, store).await
    }

    /// Builds the service over an existing store. `config` is validated
    /// the same way [`init`](Self::init) does it.
    pub async fn with_store(config: AppConfig, raw_store: DynStore) -> TollgateResult<Self> {
        config.validate().map_err(TollgateError::Config)?;
        let (metrics, worker) = MetricsCollector::spawn(&config.metrics);
        let store: DynStore = Arc::new(InstrumentedStore::new(
            raw_store.clone(),
            Arc::new(metrics.clone()),
        ));

        let sessions = SessionManager::new(store.clone(), config.session.ttl());
        let revocations = TokenRevocationRegistry::new(store.clone(), config.revocation.fail_open);
        let rate_limiter = RateLimiter::new(store.clone(), config.rate_limit.fail_open);
        let locks = DistributedLock::new(store.clone(), config.lock.default_ttl());
        let otp = OtpStore::new(store.clone(), config.otp.ttl(), config.otp.max_attempts);
        let cleanup = CleanupScheduler::new(
            store.clone(),
            sessions.clone(),
            revocations.clone(),
            config.cleanup.scan_count,
        );

        let cancel = CancellationToken::new();
        let mut tasks = vec![metrics.spawn_periodic_collect(
            raw_store.clone(),
            config.metrics.collect_interval(),
            cancel.child_token(),
        )];
        if config.cleanup.enabled {
            tasks.push(
                cleanup
                    .clone()
                    .spawn(config.cleanup.interval(), cancel.child_token()),
            );
        }

        info!(
            backend = raw_store.backend_name(),
            cleanup_enabled = config.cleanup.enabled,
            revocation_fail_open = config.revocation.fail_open,
            rate_limit_fail_open = config.rate_limit.fail_open,
            "Tollgate initialized"
        );

        Ok(Self {
            pipeline: PipelineExecutor::new(store.clone()),
            config,
            raw_store,
            store,
            sessions,
            revocations,
            rate_limiter,
            locks,
            otp,
            metrics,
            cleanup,
            cancel,
            tasks: Mutex::new(tasks),
            metrics_worker: Mutex::new(Some(worker)),
            running: AtomicBool::new(true),
        })
    }

    /// Stops background tasks, drains the metrics queue and closes the
    /// store. Calling it twice is a no-op.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down tollgate");

        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        self.metrics.flush().await;
        if let Some(worker) = self.metrics_worker.lock().take() {
            worker.abort();
        }

        self.raw_store.close().await;
        info!("Tollgate stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> TollgateResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(TollgateError::NotInitialized)
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The instrumented store every manager uses.
    pub fn store(&self) -> &DynStore {
        &self.store
    }

    pub fn pipeline(&self) -> &PipelineExecutor {
        &self.pipeline
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn revocations(&self) -> &TokenRevocationRegistry {
        &self.revocations
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn locks(&self) -> &DistributedLock {
        &self.locks
    }

    pub fn otp(&self) -> &OtpStore {
        &self.otp
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    // Rate limiting

    /// Sliding-window check against the `api` limit family.
    pub async fn check_rate_limit(
        &self,
        identifier: &str,
        max_requests: u64,
        window_secs: u64,
    ) -> TollgateResult<RateLimitResult> {
        self.check_rate_limit_with(
            RateLimitAlgorithm::SlidingWindow,
            &RateLimitKind::Api,
            identifier,
            max_requests,
            Duration::from_secs(window_secs),
        )
        .await
    }

    pub async fn check_rate_limit_with(
        &self,
        algorithm: RateLimitAlgorithm,
        kind: &RateLimitKind,
        identifier: &str,
        max_requests: u64,
        window: Duration,
    ) -> TollgateResult<RateLimitResult> {
        self.ensure_running()?;
        Ok(self
            .rate_limiter
            .check(algorithm, kind, identifier, max_requests, window)
            .await)
    }

    /// Check with the configured default limit and window.
    pub async fn check_default_rate_limit(&self, identifier: &str) -> TollgateResult<RateLimitResult> {
        self.check_rate_limit_with(
            RateLimitAlgorithm::SlidingWindow,
            &RateLimitKind::Api,
            identifier,
            self.config.rate_limit.default_max_requests,
            self.config.rate_limit.default_window(),
        )
        .await
    }

    pub async fn reset_rate_limit(&self, kind: &RateLimitKind, identifier: &str) -> TollgateResult<()> {
        self.ensure_running()?;
        self.rate_limiter.reset(kind, identifier).await
    }

    // Revocation

    pub async fn is_token_revoked(&self, fingerprint: &str) -> TollgateResult<bool> {
        self.ensure_running()?;
        Ok(self.revocations.is_revoked(fingerprint).await)
    }

    pub async fn revoke_token(
        &self,
        fingerprint: &str,
        expiry: OffsetDateTime,
        reason: &str,
    ) -> TollgateResult<bool> {
        self.ensure_running()?;
        self.revocations.revoke(fingerprint, expiry, reason).await
    }

    // Sessions

    /// Creates a session; `ttl` defaults to `session.ttl_secs`.
    pub async fn create_session(
        &self,
        subject_id: &str,
        data: &SessionData,
        ttl: Option<Duration>,
    ) -> TollgateResult<()> {
        self.ensure_running()?;
        let ttl = ttl.unwrap_or_else(|| self.sessions.default_ttl());
        self.sessions.create(subject_id, data, ttl).await
    }

    pub async fn get_session(&self, subject_id: &str) -> TollgateResult<Option<SessionData>> {
        self.ensure_running()?;
        self.sessions.get(subject_id).await
    }

    pub async fn touch_session(&self, subject_id: &str, origin: Option<&str>) -> TollgateResult<bool> {
        self.ensure_running()?;
        self.sessions.touch(subject_id, origin).await
    }

    pub async fn extend_session(&self, subject_id: &str, ttl: Duration) -> TollgateResult<bool> {
        self.ensure_running()?;
        self.sessions.extend(subject_id, ttl).await
    }

    pub async fn destroy_session(&self, subject_id: &str) -> TollgateResult<()> {
        self.ensure_running()?;
        self.sessions.destroy(subject_id).await
    }

    pub async fn active_session_count(&self) -> TollgateResult<u64> {
        self.ensure_running()?;
        self.sessions.active_count().await
    }

    // Locks

    /// Acquires a lock; `ttl` defaults to `lock.default_ttl_secs`.
    pub async fn acquire_lock(
        &self,
        resource: &str,
        ttl: Option<Duration>,
    ) -> TollgateResult<Option<LockToken>> {
        self.ensure_running()?;
        let ttl = ttl.unwrap_or_else(|| self.locks.default_ttl());
        self.locks.acquire(resource, ttl).await
    }

    pub async fn release_lock(&self, resource: &str, token: &LockToken) -> TollgateResult<bool> {
        self.ensure_running()?;
        self.locks.release(resource, token).await
    }

    pub async fn with_lock<F, Fut, T>(
        &self,
        resource: &str,
        ttl: Option<Duration>,
        f: F,
    ) -> TollgateResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.ensure_running()?;
        let ttl = ttl.unwrap_or_else(|| self.locks.default_ttl());
        self.locks.with_lock(resource, ttl, f).await
    }

    // OTP

    pub async fn issue_otp(&self, email: &str, purpose: &str, code: &str) -> TollgateResult<()> {
        self.ensure_running()?;
        self.otp.issue(email, purpose, code, None).await
    }

    pub async fn verify_otp(
        &self,
        email: &str,
        purpose: &str,
        code: &str,
    ) -> TollgateResult<OtpVerification> {
        self.ensure_running()?;
        self.otp.verify(email, purpose, code).await
    }

    pub async fn invalidate_otp(&self, email: &str, purpose: &str) -> TollgateResult<bool> {
        self.ensure_running()?;
        self.otp.invalidate(email, purpose).await
    }

    // Metrics

    /// Summary of recorded operations. Drains the metrics queue first so
    /// the figures include every operation completed before the call.
    pub async fn metrics_summary(&self) -> MetricsSummary {
        self.metrics.flush().await;
        self.metrics.summary(self.raw_store.backend_name())
    }

    pub async fn prometheus_metrics(&self) -> String {
        render_prometheus(&self.metrics_summary().await)
    }

    pub async fn export_metrics(&self, format: ExportFormat) -> MetricsExport {
        self.metrics.flush().await;
        self.metrics.export(self.raw_store.backend_name(), format)
    }

    /// Polls store statistics now instead of waiting for the next tick.
    pub async fn collect_store_stats(&self) {
        self.metrics.collect(&self.raw_store).await;
    }

    // Cleanup

    pub async fn run_cleanup(&self) -> TollgateResult<CleanupReport> {
        self.ensure_running()?;
        Ok(self.cleanup.run_once().await)
    }
}
