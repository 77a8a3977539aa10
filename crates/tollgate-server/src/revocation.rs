//! Token revocation (blacklisting).
//!
//! Revoked tokens are stored by fingerprint at `blacklist:{fingerprint}`
//! with a TTL equal to the token's remaining lifetime, so entries vanish
//! once the token would have expired anyway. Fingerprints are also kept in
//! the `tag:revoked_tokens` index, whose TTL is only ever extended to cover
//! the longest-lived entry.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tollgate_store::{Command, DynStore, Pipeline, PipelineExecutor, Reply, StoreExt};
use tracing::{debug, info, warn};

use crate::clock;
use crate::error::{TollgateError, TollgateResult};
use crate::keys;

const CLEANUP_BATCH: usize = 100;

/// Stable fingerprint of a token: lowercase hex SHA-256 of its bytes.
///
/// Raw tokens are never written to the store.
pub fn fingerprint(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Payload stored for a revoked token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevocationRecord {
    pub reason: String,
    #[serde(with = "time::serde::rfc3339")]
    pub revoked_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct TokenRevocationRegistry {
    store: DynStore,
    pipeline: PipelineExecutor,
    fail_open: bool,
}

impl TokenRevocationRegistry {
    pub fn new(store: DynStore, fail_open: bool) -> Self {
        Self {
            pipeline: PipelineExecutor::new(store.clone()),
            store,
            fail_open,
        }
    }

    pub fn fail_open(&self) -> bool {
        self.fail_open
    }

    /// Blacklists `fingerprint` until `expiry`.
    ///
    /// Returns `false` without touching the store when the token has
    /// already expired. A failed index update is logged, not returned: the
    /// blacklist key alone is authoritative.
    pub async fn revoke(
        &self,
        fingerprint: &str,
        expiry: OffsetDateTime,
        reason: &str,
    ) -> TollgateResult<bool> {
        let now = clock::now();
        let Some(ttl) = clock::until(expiry, now) else {
            debug!(fingerprint, "Token already expired, nothing to revoke");
            return Ok(false);
        };

        let record = RevocationRecord {
            reason: reason.to_string(),
            revoked_at: now,
        };
        let payload = serde_json::to_vec(&record)?;

        let mut outcome = self
            .pipeline
            .execute(
                Pipeline::new()
                    .with(Command::set_px(keys::blacklist(fingerprint), payload, ttl))
                    .with(Command::sadd(keys::REVOKED_TOKENS, fingerprint))
                    .with(Command::pttl(keys::REVOKED_TOKENS)),
            )
            .await;

        if outcome.errors[0].is_some() {
            return Err(TollgateError::from_outcome("revocation.revoke", &outcome));
        }

        match outcome.take(2).and_then(Reply::into_int) {
            Ok(index_ttl) if index_ttl < 0 || index_ttl < clock::millis(ttl) => {
                self.extend_index(ttl).await;
            }
            Ok(_) => {}
            Err(e) => warn!(fingerprint, error = %e, "Failed to read revocation index TTL"),
        }
        if let Some(error) = outcome.errors[1].as_ref() {
            warn!(fingerprint, error = %error, "Failed to index revoked token");
        }

        info!(fingerprint, reason, ttl_secs = ttl.as_secs(), "Token revoked");
        Ok(true)
    }

    async fn extend_index(&self, ttl: Duration) {
        if let Err(e) = self.store.pexpire(keys::REVOKED_TOKENS, ttl).await {
            warn!(error = %e, "Failed to extend revocation index TTL");
        }
    }

    /// Point lookup of a fingerprint.
    ///
    /// On store failure the configured policy decides: fail-open reports the
    /// token as not revoked, fail-closed reports it as revoked.
    pub async fn is_revoked(&self, fingerprint: &str) -> bool {
        match self.store.exists(&keys::blacklist(fingerprint)).await {
            Ok(revoked) => revoked,
            Err(e) => {
                warn!(
                    fingerprint,
                    error = %e,
                    fail_open = self.fail_open,
                    "Revocation check failed, applying fallback policy"
                );
                metrics::counter!(crate::metrics::names::FAIL_OPEN_TOTAL, "component" => "revocation")
                    .increment(1);
                !self.fail_open
            }
        }
    }

    /// Details of a revocation, if the fingerprint is blacklisted.
    pub async fn record(&self, fingerprint: &str) -> TollgateResult<Option<RevocationRecord>> {
        match self.store.get(&keys::blacklist(fingerprint)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Number of fingerprints in the index. May include expired entries.
    pub async fn indexed_count(&self) -> TollgateResult<u64> {
        Ok(self.store.scard(keys::REVOKED_TOKENS).await?)
    }

    /// Prunes index members whose blacklist key has expired.
    ///
    /// Returns the number of members removed.
    pub async fn cleanup(&self) -> TollgateResult<usize> {
        let members = self.store.smembers(keys::REVOKED_TOKENS).await?;
        let mut stale = Vec::new();

        for chunk in members.chunks(CLEANUP_BATCH) {
            let pipeline: Pipeline = chunk
                .iter()
                .map(|fp| Command::exists(keys::blacklist(fp)))
                .collect();
            let outcome = self.pipeline.execute(pipeline).await;

            for (fp, result) in chunk.iter().zip(outcome.results) {
                if matches!(result, Some(Reply::Int(0))) {
                    stale.push(fp.clone());
                }
            }
        }

        if stale.is_empty() {
            return Ok(0);
        }

        let removed = self
            .store
            .run(Command::srem(keys::REVOKED_TOKENS, stale.iter().cloned()))
            .await?
            .into_int()?;
        debug!(removed, "Revocation index compacted");
        Ok(removed.max(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        assert_eq!(
            fingerprint("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(fingerprint("token-a"), fingerprint("token-b"));
        assert_eq!(fingerprint("token-a").len(), 64);
    }
}
