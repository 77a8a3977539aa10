//! Sliding-window and fixed-window rate limiting.
//!
//! Both algorithms key their state at `rate_limit:{type}:{identifier}`. The
//! sliding window keeps a sorted set of request timestamps, the fixed window
//! a plain counter, so one `(type, identifier)` pair must stick to one
//! algorithm; mixing them yields a wrong-type store error, which is handled
//! like any other store failure.
//!
//! On store failure the limiter applies its configured policy. Fail-open
//! admits the request so that a cache outage does not turn into a denial
//! of service for every client.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tollgate_store::{Command, DynStore, Reply, StoreError, StoreExt};
use tracing::{debug, warn};

use crate::clock;
use crate::error::TollgateResult;
use crate::keys;

/// The `{type}` segment of a rate-limit key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitKind {
    Api,
    Login,
    Otp,
    Custom(String),
}

impl RateLimitKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Api => "api",
            Self::Login => "login",
            Self::Otp => "otp",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for RateLimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for RateLimitKind {
    fn from(s: &str) -> Self {
        match s {
            "api" => Self::Api,
            "login" => Self::Login,
            "otp" => Self::Otp,
            other => Self::Custom(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitAlgorithm {
    #[default]
    SlidingWindow,
    FixedWindow,
}

/// Admission decision for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// When the window frees up again. For the sliding window this is a
    /// hint derived from the oldest surviving entry.
    #[serde(with = "time::serde::rfc3339")]
    pub reset_at: OffsetDateTime,
}

impl RateLimitResult {
    /// Seconds a denied client should wait, rounded up.
    pub fn retry_after_secs(&self, now: OffsetDateTime) -> u64 {
        clock::until(self.reset_at, now)
            .map(|d| d.as_secs() + u64::from(d.subsec_nanos() > 0))
            .unwrap_or(0)
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: DynStore,
    fail_open: bool,
}

impl RateLimiter {
    pub fn new(store: DynStore, fail_open: bool) -> Self {
        Self { store, fail_open }
    }

    pub fn fail_open(&self) -> bool {
        self.fail_open
    }

    pub async fn check(
        &self,
        algorithm: RateLimitAlgorithm,
        kind: &RateLimitKind,
        identifier: &str,
        max_requests: u64,
        window: Duration,
    ) -> RateLimitResult {
        match algorithm {
            RateLimitAlgorithm::SlidingWindow => {
                self.check_sliding_window(kind, identifier, max_requests, window)
                    .await
            }
            RateLimitAlgorithm::FixedWindow => {
                self.check_fixed_window(kind, identifier, max_requests, window)
                    .await
            }
        }
    }

    /// Admits the request if fewer than `max_requests` were admitted during
    /// the last `window`.
    ///
    /// Purge, count and insert run as one store command, so concurrent
    /// callers never admit more than `max_requests` per window.
    pub async fn check_sliding_window(
        &self,
        kind: &RateLimitKind,
        identifier: &str,
        max_requests: u64,
        window: Duration,
    ) -> RateLimitResult {
        let now = clock::now();
        match self
            .try_sliding_window(kind, identifier, max_requests, window, now)
            .await
        {
            Ok(result) => result,
            Err(e) => self.fallback("sliding", kind, identifier, max_requests, window, now, e),
        }
    }

    async fn try_sliding_window(
        &self,
        kind: &RateLimitKind,
        identifier: &str,
        max_requests: u64,
        window: Duration,
        now: OffsetDateTime,
    ) -> TollgateResult<RateLimitResult> {
        let key = keys::rate_limit(kind.as_str(), identifier);
        let now_ms = clock::unix_millis(now);
        let window_ms = clock::millis(window);
        let member = format!("{now_ms}-{}", uuid::Uuid::new_v4().simple());

        let mut reply = self
            .store
            .run(Command::sliding_window_admit(
                &key,
                now_ms,
                window,
                max_requests,
                member,
            ))
            .await?
            .into_array()?
            .into_iter();
        let (Some(admitted), Some(count), Some(oldest)) = (reply.next(), reply.next(), reply.next())
        else {
            return Err(StoreError::protocol("short sliding window reply").into());
        };

        let admitted = admitted.into_bool()?;
        let count = count.into_int()?.max(0) as u64;
        let oldest_ms = oldest
            .into_string()?
            .and_then(|score| score.parse::<f64>().ok())
            .map(|score| score as i64);
        let reset_at = clock::from_unix_millis(oldest_ms.unwrap_or(now_ms) + window_ms);

        if !admitted {
            debug!(key = %key, count, max_requests, "Sliding window limit reached");
            return Ok(RateLimitResult {
                allowed: false,
                limit: max_requests,
                remaining: 0,
                reset_at,
            });
        }

        Ok(RateLimitResult {
            allowed: true,
            limit: max_requests,
            remaining: max_requests.saturating_sub(count + 1),
            reset_at,
        })
    }

    /// Admits the request if the counter of the current window is at most
    /// `max_requests` after incrementing it. The increment and the TTL of a
    /// new window are applied together, so a counter is never left without
    /// an expiry.
    pub async fn check_fixed_window(
        &self,
        kind: &RateLimitKind,
        identifier: &str,
        max_requests: u64,
        window: Duration,
    ) -> RateLimitResult {
        let now = clock::now();
        match self
            .try_fixed_window(kind, identifier, max_requests, window, now)
            .await
        {
            Ok(result) => result,
            Err(e) => self.fallback("fixed", kind, identifier, max_requests, window, now, e),
        }
    }

    async fn try_fixed_window(
        &self,
        kind: &RateLimitKind,
        identifier: &str,
        max_requests: u64,
        window: Duration,
        now: OffsetDateTime,
    ) -> TollgateResult<RateLimitResult> {
        let key = keys::rate_limit(kind.as_str(), identifier);

        let mut reply = self
            .store
            .run(Command::incr_window(&key, window))
            .await?
            .into_array()?
            .into_iter();
        let (Some(count), Some(ttl_ms)) = (reply.next(), reply.next()) else {
            return Err(StoreError::protocol("short fixed window reply").into());
        };
        let count = count.into_int()?.max(0) as u64;
        let ttl_ms = ttl_ms.into_int()?.max(0);

        let allowed = count <= max_requests;
        if !allowed {
            debug!(key = %key, count, max_requests, "Fixed window limit reached");
        }

        Ok(RateLimitResult {
            allowed,
            limit: max_requests,
            remaining: max_requests.saturating_sub(count),
            reset_at: now + time::Duration::milliseconds(ttl_ms),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn fallback(
        &self,
        algorithm: &'static str,
        kind: &RateLimitKind,
        identifier: &str,
        max_requests: u64,
        window: Duration,
        now: OffsetDateTime,
        error: crate::error::TollgateError,
    ) -> RateLimitResult {
        warn!(
            algorithm,
            kind = %kind,
            identifier,
            error = %error,
            fail_open = self.fail_open,
            "Rate limit check failed, applying fallback policy"
        );
        metrics::counter!(crate::metrics::names::FAIL_OPEN_TOTAL, "component" => "rate_limit")
            .increment(1);

        let reset_at = now + window;
        if self.fail_open {
            RateLimitResult {
                allowed: true,
                limit: max_requests,
                remaining: max_requests,
                reset_at,
            }
        } else {
            RateLimitResult {
                allowed: false,
                limit: max_requests,
                remaining: 0,
                reset_at,
            }
        }
    }

    /// Clears the window state for `(kind, identifier)`, whichever
    /// algorithm created it.
    pub async fn reset(&self, kind: &RateLimitKind, identifier: &str) -> TollgateResult<()> {
        let key = keys::rate_limit(kind.as_str(), identifier);
        self.store.del(&key).await?;
        debug!(key = %key, "Rate limit reset");
        Ok(())
    }

    /// Current usage without recording a request.
    pub async fn usage(&self, kind: &RateLimitKind, identifier: &str) -> TollgateResult<u64> {
        let key = keys::rate_limit(kind.as_str(), identifier);
        let reply = self.store.run(Command::zcard(&key)).await;
        match reply {
            Ok(count) => Ok(count.into_int()?.max(0) as u64),
            // A fixed-window counter is a plain string.
            Err(_) => Ok(self
                .store
                .get(&key)
                .await?
                .and_then(|b| Reply::Bytes(b).into_int().ok())
                .map(|n| n.max(0) as u64)
                .unwrap_or(0)),
        }
    }
}
