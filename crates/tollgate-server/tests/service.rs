mod common;

use std::time::Duration;

use tollgate_server::config::AppConfig;
use tollgate_server::{SessionData, Tollgate, TollgateError};

#[tokio::test]
async fn init_with_default_config_uses_memory_store() {
    let gate = Tollgate::init(AppConfig::default()).await.expect("init");
    assert_eq!(gate.store().backend_name(), "memory");
    assert!(gate.is_running());

    gate.create_session("u", &SessionData::new("u", "user"), None)
        .await
        .unwrap();
    assert_eq!(gate.active_session_count().await.unwrap(), 1);

    gate.shutdown().await;
}

#[tokio::test]
async fn init_rejects_invalid_config() {
    let mut config = AppConfig::default();
    config.session.ttl_secs = 0;
    match Tollgate::init(config).await {
        Err(TollgateError::Config(msg)) => assert!(msg.contains("session.ttl_secs")),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("invalid config accepted"),
    }
}

#[tokio::test]
async fn with_store_rejects_zero_intervals() {
    let mut cleanup = AppConfig::default();
    cleanup.cleanup.enabled = true;
    cleanup.cleanup.interval_secs = 0;

    let mut metrics = AppConfig::default();
    metrics.metrics.collect_interval_secs = 0;

    for (config, field) in [
        (cleanup, "cleanup.interval_secs"),
        (metrics, "metrics.collect_interval_secs"),
    ] {
        match Tollgate::with_store(config, common::memory_store()).await {
            Err(TollgateError::Config(msg)) => assert!(msg.contains(field), "{msg}"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("{field} = 0 accepted"),
        }
    }
}

#[tokio::test]
async fn operations_fail_after_shutdown() {
    let gate = common::service().await;
    gate.shutdown().await;
    gate.shutdown().await;

    assert!(!gate.is_running());
    assert!(matches!(
        gate.get_session("u").await,
        Err(TollgateError::NotInitialized)
    ));
    assert!(matches!(
        gate.check_rate_limit("ip", 10, 60).await,
        Err(TollgateError::NotInitialized)
    ));
    assert!(matches!(
        gate.acquire_lock("r", Some(Duration::from_secs(1))).await,
        Err(TollgateError::NotInitialized)
    ));
}

#[tokio::test]
async fn default_rate_limit_comes_from_config() {
    let mut config = AppConfig::default();
    config.rate_limit.default_max_requests = 2;
    let gate = common::service_with(config).await;

    assert!(gate.check_default_rate_limit("ip").await.unwrap().allowed);
    assert!(gate.check_default_rate_limit("ip").await.unwrap().allowed);
    let denied = gate.check_default_rate_limit("ip").await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.limit, 2);

    gate.shutdown().await;
}

#[tokio::test]
async fn lock_round_trip_through_the_service() {
    let gate = common::service().await;

    let token = gate
        .acquire_lock("nightly-report", None)
        .await
        .unwrap()
        .expect("acquired");
    assert!(gate.acquire_lock("nightly-report", None).await.unwrap().is_none());
    assert!(gate.release_lock("nightly-report", &token).await.unwrap());

    gate.shutdown().await;
}
