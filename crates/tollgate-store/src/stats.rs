//! Server-level store statistics.

use serde::{Deserialize, Serialize};

/// Snapshot of server-level statistics, parsed from `INFO` + `DBSIZE`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub used_memory_bytes: u64,
    pub key_count: u64,
    pub ops_per_sec: f64,
    pub connected_clients: u64,
    pub evicted_keys: u64,
    pub expired_keys: u64,
    pub keyspace_hits: u64,
    pub keyspace_misses: u64,
    pub uptime_secs: u64,
}

impl StoreStats {
    /// Parses the `field:value` lines of an `INFO` reply.
    ///
    /// Unknown fields and section headers are ignored; missing fields stay zero.
    pub fn from_info(info: &str) -> Self {
        let mut stats = Self::default();
        for line in info.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            match field {
                "used_memory" => stats.used_memory_bytes = parse_u64(value),
                "instantaneous_ops_per_sec" => stats.ops_per_sec = value.parse().unwrap_or(0.0),
                "connected_clients" => stats.connected_clients = parse_u64(value),
                "evicted_keys" => stats.evicted_keys = parse_u64(value),
                "expired_keys" => stats.expired_keys = parse_u64(value),
                "keyspace_hits" => stats.keyspace_hits = parse_u64(value),
                "keyspace_misses" => stats.keyspace_misses = parse_u64(value),
                "uptime_in_seconds" => stats.uptime_secs = parse_u64(value),
                _ => {}
            }
        }
        stats
    }
}

fn parse_u64(value: &str) -> u64 {
    value.trim().parse().unwrap_or(0)
}
