use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool, PoolConfig, Runtime};
use redis::aio::ConnectionLike;
use tokio::time::{sleep, timeout};
use tollgate_store::{Command, KeyValueStore, Reply, StoreError, StoreExt, StoreResult};

use crate::config::RedisStoreConfig;
use crate::convert::{map_redis_error, to_cmd, to_replies};

/// Redis-backed store over a `deadpool-redis` connection pool.
///
/// ## Connection lifecycle
///
/// - [`connect`](Self::connect) builds the pool and pings with exponential
///   backoff until Redis answers or the attempt budget is spent
/// - broken connections are detected when the pool recycles them and are
///   replaced transparently on the next checkout
/// - every checkout and round trip is bounded by the configured timeouts
///
/// After a reconnect the server may have lost volatile state (restart
/// without persistence); callers must not assume keys written before the
/// outage still exist.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl RedisStore {
    /// Create a store from an existing pool without checking connectivity.
    pub fn from_pool(pool: Pool, connect_timeout: Duration, command_timeout: Duration) -> Self {
        Self {
            pool,
            connect_timeout,
            command_timeout,
        }
    }

    /// Create the pool and wait until Redis answers a `PING`.
    pub async fn connect(config: &RedisStoreConfig) -> StoreResult<Self> {
        tracing::info!(url = %config.url, pool_size = config.pool_size, "Connecting to Redis");

        let mut redis_config = deadpool_redis::Config::from_url(config.url.clone());
        let mut pool_config = PoolConfig::new(config.pool_size);
        pool_config.timeouts.wait = Some(config.connect_timeout());
        pool_config.timeouts.create = Some(config.connect_timeout());
        pool_config.timeouts.recycle = Some(config.connect_timeout());
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::connection(format!("failed to create Redis pool: {e}")))?;

        let store = Self::from_pool(pool, config.connect_timeout(), config.command_timeout());

        let attempts = config.connect_attempts.max(1);
        let mut backoff = config.initial_backoff();
        for attempt in 1..=attempts {
            match store.ping().await {
                Ok(()) => {
                    tracing::info!(attempt, "Connected to Redis");
                    return Ok(store);
                }
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        attempt,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "Redis not reachable, retrying"
                    );
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(config.max_backoff());
                }
                Err(e) => {
                    tracing::error!(attempts, error = %e, "Giving up connecting to Redis");
                    return Err(e);
                }
            }
        }

        Err(StoreError::connection("no connection attempts were made"))
    }

    /// Pool occupancy, for health reporting.
    pub fn pool_status(&self) -> deadpool_redis::Status {
        self.pool.status()
    }

    async fn connection(&self) -> StoreResult<Connection> {
        match timeout(self.connect_timeout, self.pool.get()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed to get Redis connection");
                Err(StoreError::connection(e.to_string()))
            }
            Err(_) => Err(StoreError::timeout(self.connect_timeout)),
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn execute(&self, commands: Vec<Command>) -> StoreResult<Vec<StoreResult<Reply>>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.connection().await?;

        let mut pipe = redis::pipe();
        for command in &commands {
            pipe.add_command(to_cmd(command));
        }

        // `req_packed_commands` hands back the raw replies, with a server
        // error as a `Value::ServerError` in its slot. `query_async` would
        // fail the whole batch on the first one.
        let sent = conn.req_packed_commands(&pipe, 0, commands.len());
        let values: Vec<redis::Value> = match timeout(self.command_timeout, sent).await {
            Ok(Ok(values)) => values,
            Ok(Err(e)) => {
                tracing::warn!(commands = commands.len(), error = %e, "Redis pipeline failed");
                return Err(map_redis_error(e));
            }
            Err(_) => {
                tracing::warn!(
                    commands = commands.len(),
                    timeout_ms = self.command_timeout.as_millis() as u64,
                    "Redis pipeline timed out"
                );
                return Err(StoreError::timeout(self.command_timeout));
            }
        };

        to_replies(values, commands.len())
    }

    async fn close(&self) {
        tracing::info!("Closing Redis pool");
        self.pool.close();
    }
}
