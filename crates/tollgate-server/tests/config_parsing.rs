use std::{env, fs};

use tollgate_server::config::StoreBackend;
use tollgate_server::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("tollgate.toml");

    let toml_content = r#"
[store]
backend = "redis"
url = "redis://cache.internal:6379/2"
pool_size = 16
command_timeout_ms = 250

[session]
ttl_secs = 3600

[revocation]
fail_open = false

[rate_limit]
default_max_requests = 20
default_window_secs = 10

[otp]
max_attempts = 3

[metrics]
prometheus_listen = "127.0.0.1:9464"

[cleanup]
interval_secs = 60

[logging]
level = "debug"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses, unspecified fields keep their defaults
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.store.backend, StoreBackend::Redis);
    assert_eq!(cfg.store.pool_size, 16);
    assert_eq!(cfg.store.redis().command_timeout_ms, 250);
    assert_eq!(cfg.session.ttl_secs, 3600);
    assert!(!cfg.revocation.fail_open);
    assert!(cfg.rate_limit.fail_open);
    assert_eq!(cfg.rate_limit.default_max_requests, 20);
    assert_eq!(cfg.otp.max_attempts, 3);
    assert_eq!(cfg.otp.ttl_secs, 600);
    assert_eq!(cfg.lock.default_ttl_secs, 30);
    assert_eq!(
        cfg.metrics.prometheus_addr(),
        Some("127.0.0.1:9464".parse().unwrap())
    );
    assert!(cfg.cleanup.enabled);
    assert_eq!(cfg.cleanup.interval_secs, 60);
    assert_eq!(cfg.logging.level, "debug");

    // 2) Env override should win over file
    unsafe {
        env::set_var("TOLLGATE__SESSION__TTL_SECS", "900");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.session.ttl_secs, 900);
    unsafe {
        env::remove_var("TOLLGATE__SESSION__TTL_SECS");
    }

    // 3) Invalid config should error
    let invalid_path = dir.path().join("invalid.toml");
    let invalid_toml = r#"
[otp]
max_attempts = 0
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("otp.max_attempts must be > 0"));

    let bad_url = dir.path().join("bad_url.toml");
    fs::write(&bad_url, "[store]\nbackend = \"redis\"\nurl = \"http://cache\"\n").expect("write");
    let err = load_config(bad_url.to_str()).expect_err("expected url error");
    assert!(err.contains("store.url"));
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("absent.toml");
    let cfg = load_config(path.to_str()).expect("defaults are valid");
    assert_eq!(cfg.store.backend, StoreBackend::Memory);
    assert!(cfg.revocation.fail_open);
    assert_eq!(cfg.otp.max_attempts, 5);
}
