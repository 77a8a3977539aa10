mod common;

use std::time::Duration;

use tollgate_server::{DistributedLock, LockToken, TollgateError};

const TTL: Duration = Duration::from_secs(30);

fn locks() -> DistributedLock {
    DistributedLock::new(common::memory_store(), TTL)
}

#[tokio::test]
async fn second_acquire_is_refused() {
    let locks = locks();

    let token = locks.acquire("invoice:42", TTL).await.unwrap();
    assert!(token.is_some());
    assert!(locks.acquire("invoice:42", TTL).await.unwrap().is_none());
    assert!(locks.is_locked("invoice:42").await.unwrap());

    // Different resources do not contend
    assert!(locks.acquire("invoice:43", TTL).await.unwrap().is_some());
}

#[tokio::test]
async fn only_the_owner_can_release() {
    let locks = locks();
    let token = locks.acquire("job", TTL).await.unwrap().expect("acquired");

    let stranger = LockToken::from("not-the-owner".to_string());
    assert!(!locks.release("job", &stranger).await.unwrap());
    assert!(locks.is_locked("job").await.unwrap());

    assert!(locks.release("job", &token).await.unwrap());
    assert!(!locks.is_locked("job").await.unwrap());
    assert!(!locks.release("job", &token).await.unwrap());

    assert!(locks.acquire("job", TTL).await.unwrap().is_some());
}

#[tokio::test]
async fn expired_owner_cannot_release_the_new_holder() {
    let locks = locks();
    let stale = locks
        .acquire("report", Duration::from_millis(50))
        .await
        .unwrap()
        .expect("acquired");

    common::sleep_ms(150).await;

    let fresh = locks.acquire("report", TTL).await.unwrap().expect("lock expired");
    assert_ne!(stale, fresh);
    assert!(!locks.release("report", &stale).await.unwrap());
    assert!(locks.is_locked("report").await.unwrap());
}

#[tokio::test]
async fn with_lock_runs_and_releases() {
    let gate = common::service().await;

    let value = gate
        .with_lock("migration", None, || async { 7 })
        .await
        .unwrap();
    assert_eq!(value, 7);
    assert!(!gate.locks().is_locked("migration").await.unwrap());
}

#[tokio::test]
async fn with_lock_is_not_reentrant() {
    let locks = locks();
    let inner = &locks;

    let nested = locks
        .with_lock("sync", TTL, move || async move {
            inner.with_lock("sync", TTL, || async { 1 }).await
        })
        .await
        .unwrap();

    assert!(matches!(
        nested,
        Err(TollgateError::LockUnavailable { ref resource }) if resource == "sync"
    ));
    assert!(!locks.is_locked("sync").await.unwrap());
}

#[tokio::test]
async fn with_lock_releases_on_panic() {
    let locks = locks();
    let task_locks = locks.clone();

    let joined = tokio::spawn(async move {
        task_locks
            .with_lock::<_, _, ()>("fragile", TTL, || async { panic!("boom") })
            .await
    })
    .await;

    assert!(joined.expect_err("panic propagates").is_panic());
    assert!(!locks.is_locked("fragile").await.unwrap());
}

#[tokio::test]
async fn dropped_guard_releases_in_background() {
    let locks = locks();
    {
        let guard = locks
            .acquire_guard("cache-warm", TTL)
            .await
            .unwrap()
            .expect("acquired");
        assert_eq!(guard.resource(), "cache-warm");
        assert!(locks.is_locked("cache-warm").await.unwrap());
    }

    common::sleep_ms(50).await;
    assert!(!locks.is_locked("cache-warm").await.unwrap());
}

#[tokio::test]
async fn guard_release_reports_ownership() {
    let locks = locks();
    let guard = locks
        .acquire_guard("export", TTL)
        .await
        .unwrap()
        .expect("acquired");
    assert!(guard.release().await.unwrap());
    assert!(!locks.is_locked("export").await.unwrap());
}

#[tokio::test]
async fn acquire_surfaces_store_errors() {
    let locks = DistributedLock::new(common::unreachable_store(), TTL);
    let err = locks.acquire("x", TTL).await.expect_err("no lock without a store");
    assert!(err.is_transient());
}
