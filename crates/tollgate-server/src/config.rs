use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};
use tollgate_store_redis::RedisStoreConfig;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub revocation: RevocationConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub otp: OtpConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Store validations
        if self.store.backend == StoreBackend::Redis {
            let url = self.store.url.trim();
            if !(url.starts_with("redis://") || url.starts_with("rediss://")) {
                return Err("store.url must start with redis:// or rediss://".into());
            }
            if self.store.pool_size == 0 {
                return Err("store.pool_size must be > 0".into());
            }
            if self.store.connect_timeout_ms == 0 || self.store.command_timeout_ms == 0 {
                return Err("store timeouts must be > 0".into());
            }
        }
        // TTL validations
        if self.session.ttl_secs == 0 {
            return Err("session.ttl_secs must be > 0".into());
        }
        if self.lock.default_ttl_secs == 0 {
            return Err("lock.default_ttl_secs must be > 0".into());
        }
        if self.otp.ttl_secs == 0 {
            return Err("otp.ttl_secs must be > 0".into());
        }
        if self.otp.max_attempts == 0 {
            return Err("otp.max_attempts must be > 0".into());
        }
        // Rate limit validations
        if self.rate_limit.default_max_requests == 0 {
            return Err("rate_limit.default_max_requests must be > 0".into());
        }
        if self.rate_limit.default_window_secs == 0 {
            return Err("rate_limit.default_window_secs must be > 0".into());
        }
        // Metrics validations
        if self.metrics.history_capacity == 0 {
            return Err("metrics.history_capacity must be > 0".into());
        }
        if self.metrics.queue_capacity == 0 {
            return Err("metrics.queue_capacity must be > 0".into());
        }
        if self.metrics.collect_interval_secs == 0 {
            return Err("metrics.collect_interval_secs must be > 0".into());
        }
        if let Some(listen) = self.metrics.prometheus_listen.as_deref() {
            listen
                .parse::<SocketAddr>()
                .map_err(|e| format!("metrics.prometheus_listen is not a socket address: {e}"))?;
        }
        // Cleanup validations
        if self.cleanup.enabled && self.cleanup.interval_secs == 0 {
            return Err("cleanup.interval_secs must be > 0 when cleanup is enabled".into());
        }
        if self.cleanup.scan_count == 0 {
            return Err("cleanup.scan_count must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store; state is local to this instance.
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_store_url() -> String {
    RedisStoreConfig::default().url
}
fn default_pool_size() -> usize {
    RedisStoreConfig::default().pool_size
}
fn default_connect_timeout_ms() -> u64 {
    RedisStoreConfig::default().connect_timeout_ms
}
fn default_command_timeout_ms() -> u64 {
    RedisStoreConfig::default().command_timeout_ms
}
fn default_connect_attempts() -> u32 {
    RedisStoreConfig::default().connect_attempts
}
fn default_initial_backoff_ms() -> u64 {
    RedisStoreConfig::default().initial_backoff_ms
}
fn default_max_backoff_ms() -> u64 {
    RedisStoreConfig::default().max_backoff_ms
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_store_url(),
            pool_size: default_pool_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            connect_attempts: default_connect_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl StoreConfig {
    pub fn redis(&self) -> RedisStoreConfig {
        RedisStoreConfig {
            url: self.url.clone(),
            pool_size: self.pool_size,
            connect_timeout_ms: self.connect_timeout_ms,
            command_timeout_ms: self.command_timeout_ms,
            connect_attempts: self.connect_attempts,
            initial_backoff_ms: self.initial_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sliding session lifetime, refreshed on every touch
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_session_ttl_secs() -> u64 {
    86_400
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationConfig {
    /// Report tokens as not revoked when the store is unreachable
    #[serde(default = "default_true")]
    pub fail_open: bool,
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self { fail_open: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Admit requests when the store is unreachable
    #[serde(default = "default_true")]
    pub fail_open: bool,
    #[serde(default = "default_max_requests")]
    pub default_max_requests: u64,
    #[serde(default = "default_window_secs")]
    pub default_window_secs: u64,
}

fn default_max_requests() -> u64 {
    100
}
fn default_window_secs() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            fail_open: true,
            default_max_requests: default_max_requests(),
            default_window_secs: default_window_secs(),
        }
    }
}

impl RateLimitConfig {
    pub fn default_window(&self) -> Duration {
        Duration::from_secs(self.default_window_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_ttl_secs")]
    pub default_ttl_secs: u64,
}

fn default_lock_ttl_secs() -> u64 {
    30
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_lock_ttl_secs(),
        }
    }
}

impl LockConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpConfig {
    #[serde(default = "default_otp_ttl_secs")]
    pub ttl_secs: u64,
    /// Failed verifications allowed before the code is invalidated
    #[serde(default = "default_otp_max_attempts")]
    pub max_attempts: u32,
}

fn default_otp_ttl_secs() -> u64 {
    600
}
fn default_otp_max_attempts() -> u32 {
    5
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_otp_ttl_secs(),
            max_attempts: default_otp_max_attempts(),
        }
    }
}

impl OtpConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Number of recent operations kept for the query helpers
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Records queued for the metrics worker before new ones are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How often store statistics are polled
    #[serde(default = "default_collect_interval_secs")]
    pub collect_interval_secs: u64,
    #[serde(default = "default_slow_threshold_ms")]
    pub slow_threshold_ms: u64,
    /// Address for the daemon's Prometheus scrape endpoint, e.g. "0.0.0.0:9464"
    #[serde(default)]
    pub prometheus_listen: Option<String>,
}

fn default_history_capacity() -> usize {
    1000
}
fn default_queue_capacity() -> usize {
    10_000
}
fn default_collect_interval_secs() -> u64 {
    30
}
fn default_slow_threshold_ms() -> u64 {
    100
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            queue_capacity: default_queue_capacity(),
            collect_interval_secs: default_collect_interval_secs(),
            slow_threshold_ms: default_slow_threshold_ms(),
            prometheus_listen: None,
        }
    }
}

impl MetricsConfig {
    pub fn collect_interval(&self) -> Duration {
        Duration::from_secs(self.collect_interval_secs)
    }

    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_threshold_ms)
    }

    pub fn prometheus_addr(&self) -> Option<SocketAddr> {
        self.prometheus_listen.as_deref().and_then(|s| s.parse().ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cleanup_interval_secs")]
    pub interval_secs: u64,
    /// COUNT hint passed to each SCAN call
    #[serde(default = "default_scan_count")]
    pub scan_count: usize,
}

fn default_cleanup_interval_secs() -> u64 {
    300
}
fn default_scan_count() -> usize {
    100
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_cleanup_interval_secs(),
            scan_count: default_scan_count(),
        }
    }
}

impl CleanupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_true() -> bool {
    true
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_FILE: &str = "tollgate.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        } else if path.is_some() {
            tracing::warn!(path = %pathbuf.display(), "Config file not found, using defaults");
        }
        // Environment variable overrides, e.g., TOLLGATE__SESSION__TTL_SECS=3600
        builder = builder.add_source(
            Environment::with_prefix("TOLLGATE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.store.backend, StoreBackend::Memory);
        assert_eq!(cfg.session.ttl_secs, 86_400);
        assert_eq!(cfg.metrics.history_capacity, 1000);
        assert_eq!(cfg.metrics.queue_capacity, 10_000);
        assert_eq!(cfg.cleanup.interval_secs, 300);
        assert!(cfg.revocation.fail_open);
        assert!(cfg.rate_limit.fail_open);
    }

    #[test]
    fn test_redis_backend_requires_redis_url() {
        let mut cfg = AppConfig::default();
        cfg.store.backend = StoreBackend::Redis;
        cfg.store.url = "http://localhost:6379".into();
        assert!(cfg.validate().is_err());

        cfg.store.url = "redis://cache:6379/1".into();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.store.redis().url, "redis://cache:6379/1");
    }

    #[test]
    fn test_invalid_prometheus_listen_rejected() {
        let mut cfg = AppConfig::default();
        cfg.metrics.prometheus_listen = Some("not-an-address".into());
        assert!(cfg.validate().is_err());

        cfg.metrics.prometheus_listen = Some("127.0.0.1:9464".into());
        assert!(cfg.validate().is_ok());
        assert!(cfg.metrics.prometheus_addr().is_some());
    }

    #[test]
    fn test_default_config_serializes_to_toml() {
        let rendered = toml::to_string_pretty(&AppConfig::default()).expect("render toml");
        assert!(rendered.contains("[session]"));
        let parsed: AppConfig = toml::from_str(&rendered).expect("parse toml");
        assert_eq!(parsed.cleanup.scan_count, 100);
    }
}
