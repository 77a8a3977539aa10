//! Integration tests for the Redis store backend.
//!
//! Tests use testcontainers to spin up a real Redis instance and are
//! ignored by default. Run with `cargo test -- --ignored`.

use std::time::Duration;

use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;
use tollgate_store::{
    Command, KeyValueStore, Pipeline, PipelineExecutor, Reply, StoreError, StoreExt,
};
use tollgate_store_redis::{RedisStore, RedisStoreConfig};

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{}", host_port);

            (container, url)
        })
        .await;

    url.clone()
}

async fn connect() -> RedisStore {
    let config = RedisStoreConfig {
        url: get_redis_url().await,
        pool_size: 4,
        ..Default::default()
    };
    RedisStore::connect(&config).await.expect("connect to redis")
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_set_get_and_ttl() {
    let store = connect().await;

    store
        .set_px("it:get", b"value".to_vec(), Duration::from_secs(60))
        .await
        .unwrap();

    assert_eq!(store.get("it:get").await.unwrap(), Some(b"value".to_vec()));
    let ttl = store.pttl("it:get").await.unwrap();
    assert!(ttl > 0 && ttl <= 60_000);
    assert_eq!(store.pttl("it:missing").await.unwrap(), -2);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_set_nx_and_compare_and_delete() {
    let store = connect().await;
    let ttl = Duration::from_secs(30);

    assert!(store.set_nx_px("it:lock", b"a".to_vec(), ttl).await.unwrap());
    assert!(!store.set_nx_px("it:lock", b"b".to_vec(), ttl).await.unwrap());

    assert!(!store.compare_and_delete("it:lock", b"b".to_vec()).await.unwrap());
    assert!(store.compare_and_delete("it:lock", b"a".to_vec()).await.unwrap());
    assert!(!store.exists("it:lock").await.unwrap());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_pipeline_reports_wrongtype_per_command() {
    let store = connect().await;
    store
        .set_px("it:string", b"x".to_vec(), Duration::from_secs(60))
        .await
        .unwrap();

    let executor = PipelineExecutor::new(std::sync::Arc::new(store));
    let outcome = executor
        .execute(
            Pipeline::new()
                .with(Command::incr("it:counter"))
                .with(Command::sadd("it:string", "member"))
                .with(Command::exists("it:string")),
        )
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.failed_indices(), vec![1]);
    assert!(matches!(
        outcome.errors[1],
        Some(StoreError::Operation { .. })
    ));
    assert_eq!(outcome.reply(2).unwrap(), &Reply::Int(1));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_wrongtype_leaves_neighbouring_commands_applied() {
    let store = connect().await;

    let replies = store
        .execute(vec![
            Command::set_px("it:mixed", b"a".to_vec(), Duration::from_secs(60)),
            Command::sadd("it:mixed", "member"),
            Command::get("it:mixed"),
        ])
        .await
        .unwrap();

    assert_eq!(replies.len(), 3);
    assert_eq!(replies[0].as_ref().unwrap(), &Reply::Ok);
    match &replies[1] {
        Err(StoreError::Operation { message }) => assert!(message.contains("WRONGTYPE")),
        other => panic!("expected WRONGTYPE, got {other:?}"),
    }
    assert_eq!(replies[2].as_ref().unwrap(), &Reply::Bytes(b"a".to_vec()));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_sorted_set_window() {
    let store = connect().await;
    let replies = store
        .execute(vec![
            Command::zadd("it:window", 100.0, "a"),
            Command::zadd("it:window", 200.0, "b"),
            Command::zremrangebyscore("it:window", 0.0, 100.0),
            Command::zcard("it:window"),
            Command::zrange_withscores("it:window", 0, 0),
        ])
        .await
        .unwrap();

    let mut replies = replies.into_iter();
    let _ = replies.next();
    let _ = replies.next();
    assert_eq!(replies.next().unwrap().unwrap().into_int().unwrap(), 1);
    assert_eq!(replies.next().unwrap().unwrap().into_int().unwrap(), 1);
    let oldest = replies.next().unwrap().unwrap().into_scored().unwrap();
    assert_eq!(oldest, vec![("b".to_string(), 200.0)]);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_scan_and_stats() {
    let store = connect().await;
    for i in 0..25 {
        store
            .set_px(&format!("it:scan:{i}"), b"1".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
    }

    let keys = store.scan_match("it:scan:*", 10).await.unwrap();
    assert_eq!(keys.len(), 25);

    let stats = store.stats().await.unwrap();
    assert!(stats.key_count >= 25);
    assert!(stats.used_memory_bytes > 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_connect_gives_up_on_unreachable_server() {
    let config = RedisStoreConfig {
        url: "redis://127.0.0.1:1".to_string(),
        connect_attempts: 2,
        initial_backoff_ms: 10,
        connect_timeout_ms: 500,
        ..Default::default()
    };

    let err = RedisStore::connect(&config).await.err().expect("should fail");
    assert!(err.is_transient());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_conditional_commands() {
    let store = connect().await;
    let ttl = Duration::from_secs(60);

    assert!(!store.set_xx_px("it:xx", b"a".to_vec(), ttl).await.unwrap());
    store.set_px("it:xx", b"a".to_vec(), ttl).await.unwrap();
    assert!(store.set_xx_px("it:xx", b"b".to_vec(), ttl).await.unwrap());

    store.run(Command::sadd("it:idx", "live")).await.unwrap();
    store.run(Command::sadd("it:idx", "gone")).await.unwrap();
    store.set_px("it:s:live", b"x".to_vec(), ttl).await.unwrap();
    let replies = store
        .execute(vec![
            Command::srem_if_missing("it:idx", "live", "it:s:live"),
            Command::srem_if_missing("it:idx", "gone", "it:s:gone"),
        ])
        .await
        .unwrap();
    assert_eq!(replies[0].as_ref().unwrap(), &Reply::Int(0));
    assert_eq!(replies[1].as_ref().unwrap(), &Reply::Int(1));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_rate_limit_scripts() {
    let store = connect().await;
    let window = Duration::from_secs(60);

    for (i, expected) in [(0, 1), (1, 1), (2, 0)] {
        let reply = store
            .run(Command::sliding_window_admit(
                "it:sliding",
                1_000 + i,
                window,
                2,
                format!("m{i}"),
            ))
            .await
            .unwrap()
            .into_array()
            .unwrap();
        assert_eq!(reply[0], Reply::Int(expected));
        assert_eq!(reply[1], Reply::Int(i.min(2)));
    }
    assert!(store.pttl("it:sliding").await.unwrap() > 0);

    let first = store
        .run(Command::incr_window("it:fixed", window))
        .await
        .unwrap()
        .into_array()
        .unwrap();
    assert_eq!(first[0], Reply::Int(1));
    assert!(store.pttl("it:fixed").await.unwrap() > 0);
}
