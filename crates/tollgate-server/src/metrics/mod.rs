//! Operational metrics.
//!
//! This module provides:
//! - [`MetricsCollector`]: per-operation counters, mean latency and a
//!   bounded history, fed through a queue by the instrumented store
//! - periodic polling of store statistics
//! - summary and Prometheus text export
//!
//! Every figure is also mirrored to the global `metrics` facade, so a
//! process-level recorder (see [`install_prometheus_exporter`]) sees the
//! same numbers.

mod collector;
mod export;

pub use collector::{MetricsCollector, MetricsSnapshot};
pub use export::{ExportFormat, MetricsExport, MetricsSummary, render_prometheus};

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Metric names as constants for consistency.
pub mod names {
    // Store operation metrics
    pub const STORE_OPERATIONS_TOTAL: &str = "tollgate_store_operations_total";
    pub const STORE_OPERATION_ERRORS_TOTAL: &str = "tollgate_store_operation_errors_total";
    pub const STORE_OPERATION_DURATION_SECONDS: &str = "tollgate_store_operation_duration_seconds";
    pub const CACHE_HITS_TOTAL: &str = "tollgate_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "tollgate_cache_misses_total";
    pub const METRICS_DROPPED_TOTAL: &str = "tollgate_metrics_dropped_total";

    // Policy metrics
    pub const FAIL_OPEN_TOTAL: &str = "tollgate_fallback_decisions_total";

    // Store statistics
    pub const STORE_USED_MEMORY_BYTES: &str = "tollgate_store_used_memory_bytes";
    pub const STORE_KEYS: &str = "tollgate_store_keys";
    pub const STORE_OPS_PER_SEC: &str = "tollgate_store_ops_per_sec";
    pub const STORE_CONNECTED_CLIENTS: &str = "tollgate_store_connected_clients";
    pub const STORE_EVICTED_KEYS: &str = "tollgate_store_evicted_keys";
    pub const STORE_EXPIRED_KEYS: &str = "tollgate_store_expired_keys";

    // Cleanup metrics
    pub const CLEANUP_RUNS_TOTAL: &str = "tollgate_cleanup_runs_total";
    pub const CLEANUP_REMOVED_TOTAL: &str = "tollgate_cleanup_removed_total";
}

/// Installs the global Prometheus recorder with an HTTP scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn install_prometheus_exporter(listen: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()
        .map_err(|e| format!("failed to install Prometheus exporter: {e}"))?;
    tracing::info!(%listen, "Prometheus exporter listening");
    Ok(())
}
