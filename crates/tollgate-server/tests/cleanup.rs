mod common;

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tollgate_server::{CleanupScheduler, SessionData, SessionManager, TokenRevocationRegistry};
use tollgate_store::{Command, DynStore, StoreExt};

fn scheduler(store: &DynStore) -> (CleanupScheduler, SessionManager) {
    let sessions = SessionManager::new(store.clone(), Duration::from_secs(60));
    let revocations = TokenRevocationRegistry::new(store.clone(), true);
    let scheduler = CleanupScheduler::new(store.clone(), sessions.clone(), revocations, 2);
    (scheduler, sessions)
}

async fn seed_orphans(store: &DynStore) {
    for key in [
        "blacklist:orphan",
        "rate_limit:api:orphan",
        "otp:orphan@example.com:login",
    ] {
        store.run(Command::set(key, "x")).await.unwrap();
    }
}

#[tokio::test]
async fn sweep_removes_keys_without_ttl() {
    let store = common::memory_store();
    let (scheduler, _) = scheduler(&store);

    seed_orphans(&store).await;
    store
        .set_px("blacklist:timed", b"{}".to_vec(), Duration::from_secs(60))
        .await
        .unwrap();
    store
        .set_px("rate_limit:api:timed", b"1".to_vec(), Duration::from_secs(60))
        .await
        .unwrap();
    // Outside the swept families
    store.run(Command::set("config:flag", "on")).await.unwrap();

    let report = scheduler.run_once().await;
    assert_eq!(report.orphaned_blacklist_keys, 1);
    assert_eq!(report.orphaned_rate_limits, 1);
    assert_eq!(report.expired_otps, 1);
    assert_eq!(report.failed_steps, 0);
    assert_eq!(report.removed(), 3);

    assert!(!store.exists("blacklist:orphan").await.unwrap());
    assert!(store.exists("blacklist:timed").await.unwrap());
    assert!(store.exists("rate_limit:api:timed").await.unwrap());
    assert!(store.exists("config:flag").await.unwrap());
}

#[tokio::test]
async fn sweep_reconciles_indexes() {
    let store = common::memory_store();
    let (scheduler, sessions) = scheduler(&store);

    for id in ["a", "b", "c"] {
        sessions
            .create(id, &SessionData::new(id, "user"), Duration::from_millis(50))
            .await
            .unwrap();
    }
    sessions
        .create("d", &SessionData::new("d", "user"), Duration::from_secs(60))
        .await
        .unwrap();
    common::sleep_ms(150).await;

    let report = scheduler.run_once().await;
    assert_eq!(report.stale_sessions, 3);
    assert_eq!(sessions.active_subjects().await.unwrap(), vec!["d"]);
}

#[tokio::test]
async fn failing_store_is_reported_not_raised() {
    let store = common::unreachable_store();
    let (scheduler, _) = scheduler(&store);

    let report = scheduler.run_once().await;
    assert_eq!(report.removed(), 0);
    assert_eq!(report.failed_steps, 5);
}

#[tokio::test]
async fn spawned_scheduler_runs_until_cancelled() {
    let store = common::memory_store();
    let (scheduler, _) = scheduler(&store);
    let cancel = CancellationToken::new();

    let handle = scheduler.spawn(Duration::from_millis(50), cancel.clone());
    seed_orphans(&store).await;
    common::sleep_ms(200).await;

    assert!(store.scan_match("*", 100).await.unwrap().is_empty());

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("scheduler stops on cancel")
        .unwrap();
}

#[tokio::test]
async fn service_exposes_a_manual_sweep() {
    let gate = common::service().await;
    seed_orphans(gate.store()).await;

    let report = gate.run_cleanup().await.unwrap();
    assert_eq!(report.removed(), 3);
}
