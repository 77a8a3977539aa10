use std::fmt::Write as _;

use serde::Serialize;
use time::OffsetDateTime;
use tollgate_store::StoreStats;

use super::collector::{MetricsCollector, MetricsSnapshot};
use crate::clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Summary,
    Prometheus,
}

#[derive(Debug, Clone)]
pub enum MetricsExport {
    Summary(MetricsSummary),
    Prometheus(String),
}

/// Structured view of the collector for health and admin endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub backend: String,
    pub counters: MetricsSnapshot,
    pub history_len: usize,
    pub store: Option<StoreStats>,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
}

impl MetricsCollector {
    pub fn summary(&self, backend: &str) -> MetricsSummary {
        MetricsSummary {
            backend: backend.to_string(),
            counters: self.snapshot(),
            history_len: self.history_len(),
            store: self.store_stats(),
            generated_at: clock::now(),
        }
    }

    pub fn export(&self, backend: &str, format: ExportFormat) -> MetricsExport {
        let summary = self.summary(backend);
        match format {
            ExportFormat::Summary => MetricsExport::Summary(summary),
            ExportFormat::Prometheus => MetricsExport::Prometheus(render_prometheus(&summary)),
        }
    }
}

/// Renders a summary in the Prometheus text exposition format.
pub fn render_prometheus(summary: &MetricsSummary) -> String {
    let mut out = String::new();
    let c = &summary.counters;

    metric(&mut out, "tollgate_cache_hits_total", "Reads that found a value.", "counter", c.hits as f64);
    metric(&mut out, "tollgate_cache_misses_total", "Reads that found nothing.", "counter", c.misses as f64);
    metric(&mut out, "tollgate_cache_sets_total", "Write commands.", "counter", c.sets as f64);
    metric(&mut out, "tollgate_cache_deletes_total", "Delete commands.", "counter", c.deletes as f64);
    metric(&mut out, "tollgate_cache_errors_total", "Failed commands.", "counter", c.errors as f64);
    metric(&mut out, "tollgate_cache_operations_total", "All recorded commands.", "counter", c.total_operations as f64);
    metric(&mut out, "tollgate_cache_hit_rate", "Hits divided by reads.", "gauge", c.hit_rate);
    metric(
        &mut out,
        "tollgate_cache_average_latency_ms",
        "Mean round-trip latency in milliseconds.",
        "gauge",
        c.average_latency_ms,
    );
    metric(
        &mut out,
        "tollgate_metrics_dropped_total",
        "Operation records dropped because the queue was full.",
        "counter",
        c.dropped_records as f64,
    );

    header(&mut out, "tollgate_cache_operations_by_type_total", "Commands by type.", "counter");
    for (operation, count) in &c.operations_by_type {
        let _ = writeln!(
            out,
            "tollgate_cache_operations_by_type_total{{operation=\"{}\"}} {count}",
            escape_label(operation)
        );
    }

    if let Some(stats) = &summary.store {
        metric(&mut out, "tollgate_store_used_memory_bytes", "Memory used by the store.", "gauge", stats.used_memory_bytes as f64);
        metric(&mut out, "tollgate_store_keys", "Keys in the store.", "gauge", stats.key_count as f64);
        metric(&mut out, "tollgate_store_ops_per_sec", "Store operations per second.", "gauge", stats.ops_per_sec);
        metric(&mut out, "tollgate_store_connected_clients", "Clients connected to the store.", "gauge", stats.connected_clients as f64);
        metric(&mut out, "tollgate_store_evicted_keys", "Keys evicted by the store.", "gauge", stats.evicted_keys as f64);
        metric(&mut out, "tollgate_store_expired_keys", "Keys expired by the store.", "gauge", stats.expired_keys as f64);
    }

    out
}

fn header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

fn metric(out: &mut String, name: &str, help: &str, kind: &str, value: f64) {
    header(out, name, help, kind);
    let _ = writeln!(out, "{name} {value}");
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
