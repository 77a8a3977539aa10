//! Ownership-checked distributed lock.
//!
//! A lock is the key `lock:{resource}` holding a random ownership token,
//! written with set-if-absent and a TTL that bounds the hold time. Release
//! is an atomic compare-and-delete, so a caller whose lock already expired
//! and was taken over cannot delete the new holder's lock.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use tollgate_store::{DynStore, StoreExt};
use tracing::{debug, warn};

use crate::error::{TollgateError, TollgateResult};
use crate::keys;

/// Opaque proof of lock ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for LockToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone)]
pub struct DistributedLock {
    store: DynStore,
    default_ttl: Duration,
}

impl DistributedLock {
    pub fn new(store: DynStore, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Takes the lock if it is free.
    ///
    /// Returns `None` when another owner holds it. Store failures are
    /// returned, never treated as "acquired".
    pub async fn acquire(&self, resource: &str, ttl: Duration) -> TollgateResult<Option<LockToken>> {
        let token = LockToken::generate();
        let acquired = self
            .store
            .set_nx_px(&keys::lock(resource), token.0.clone().into_bytes(), ttl)
            .await?;

        if acquired {
            debug!(resource, ttl_ms = ttl.as_millis() as u64, "Lock acquired");
            Ok(Some(token))
        } else {
            debug!(resource, "Lock held by another owner");
            Ok(None)
        }
    }

    /// Deletes the lock if `token` still owns it.
    ///
    /// Returns `false` when the lock expired or belongs to someone else.
    pub async fn release(&self, resource: &str, token: &LockToken) -> TollgateResult<bool> {
        release(&self.store, resource, token).await
    }

    pub async fn is_locked(&self, resource: &str) -> TollgateResult<bool> {
        Ok(self.store.exists(&keys::lock(resource)).await?)
    }

    /// Like [`acquire`](Self::acquire), returning a guard that releases the
    /// lock when dropped.
    pub async fn acquire_guard(
        &self,
        resource: &str,
        ttl: Duration,
    ) -> TollgateResult<Option<LockGuard>> {
        Ok(self.acquire(resource, ttl).await?.map(|token| LockGuard {
            store: self.store.clone(),
            resource: resource.to_string(),
            token: Some(token),
        }))
    }

    /// Runs `f` while holding the lock on `resource`.
    ///
    /// Fails with [`TollgateError::LockUnavailable`] when the lock is held.
    /// The lock is released on every exit path: normal return, panic inside
    /// `f` (re-raised after release) and cancellation of the returned future
    /// (released in the background by the guard).
    pub async fn with_lock<F, Fut, T>(&self, resource: &str, ttl: Duration, f: F) -> TollgateResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self
            .acquire_guard(resource, ttl)
            .await?
            .ok_or_else(|| TollgateError::lock_unavailable(resource))?;

        let outcome = AssertUnwindSafe(f()).catch_unwind().await;

        match guard.release().await {
            Ok(true) => {}
            Ok(false) => warn!(resource, "Lock expired before the critical section finished"),
            Err(e) => warn!(resource, error = %e, "Failed to release lock, it will expire by TTL"),
        }

        match outcome {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

async fn release(store: &DynStore, resource: &str, token: &LockToken) -> TollgateResult<bool> {
    let released = store
        .compare_and_delete(&keys::lock(resource), token.0.clone().into_bytes())
        .await?;
    if released {
        debug!(resource, "Lock released");
    } else {
        debug!(resource, "Lock not released, token does not own it");
    }
    Ok(released)
}

/// A held lock.
///
/// Call [`release`](Self::release) to release it and observe the result.
/// A guard dropped without release schedules a best-effort release on the
/// current Tokio runtime; outside a runtime the lock expires by TTL.
pub struct LockGuard {
    store: DynStore,
    resource: String,
    token: Option<LockToken>,
}

impl LockGuard {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn token(&self) -> Option<&LockToken> {
        self.token.as_ref()
    }

    pub async fn release(mut self) -> TollgateResult<bool> {
        match self.token.take() {
            Some(token) => release(&self.store, &self.resource, &token).await,
            None => Ok(false),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = self.store.clone();
                let resource = std::mem::take(&mut self.resource);
                handle.spawn(async move {
                    if let Err(e) = release(&store, &resource, &token).await {
                        warn!(resource = %resource, error = %e, "Background lock release failed");
                    }
                });
            }
            Err(_) => {
                warn!(resource = %self.resource, "Lock guard dropped outside a runtime, lock will expire by TTL");
            }
        }
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("resource", &self.resource)
            .field("held", &self.token.is_some())
            .finish()
    }
}
