//! One-time passcodes stored at `otp:{email}:{type}`.
//!
//! Only a salted SHA-256 of the code is stored. Each failed verification
//! increments an attempts counter; reaching the limit invalidates the code.
//! A successful verification consumes the code with an atomic
//! compare-and-delete, so two concurrent verifications of the same code
//! cannot both succeed.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tollgate_store::{DynStore, StoreExt};
use tracing::{debug, info, warn};

use crate::clock;
use crate::error::TollgateResult;
use crate::keys;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OtpRecord {
    code_hash: String,
    attempts: u32,
    max_attempts: u32,
    #[serde(with = "time::serde::rfc3339")]
    issued_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    expires_at: OffsetDateTime,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "version")]
enum OtpEnvelope {
    #[serde(rename = "1")]
    V1(OtpRecord),
}

/// Result of checking a submitted code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpVerification {
    /// The code matched and has been consumed.
    Verified,
    /// Wrong code; the record stays valid.
    Invalid { remaining_attempts: u32 },
    /// No code was issued, or it expired or was already used.
    Missing,
    /// The attempt limit was reached; the code is gone.
    TooManyAttempts,
}

#[derive(Clone)]
pub struct OtpStore {
    store: DynStore,
    default_ttl: Duration,
    max_attempts: u32,
}

impl OtpStore {
    pub fn new(store: DynStore, default_ttl: Duration, max_attempts: u32) -> Self {
        Self {
            store,
            default_ttl,
            max_attempts,
        }
    }

    fn hash_code(key: &str, code: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hasher.update(b":");
        hasher.update(code.trim().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Stores `code` for `(email, purpose)`, replacing any previous code.
    pub async fn issue(
        &self,
        email: &str,
        purpose: &str,
        code: &str,
        ttl: Option<Duration>,
    ) -> TollgateResult<()> {
        let key = keys::otp(email, purpose);
        let ttl = ttl.unwrap_or(self.default_ttl);
        let now = clock::now();

        let record = OtpRecord {
            code_hash: Self::hash_code(&key, code),
            attempts: 0,
            max_attempts: self.max_attempts,
            issued_at: now,
            expires_at: now + ttl,
        };
        let payload = serde_json::to_vec(&OtpEnvelope::V1(record))?;
        self.store.set_px(&key, payload, ttl).await?;

        info!(key = %key, ttl_secs = ttl.as_secs(), "OTP issued");
        Ok(())
    }

    pub async fn verify(
        &self,
        email: &str,
        purpose: &str,
        code: &str,
    ) -> TollgateResult<OtpVerification> {
        let key = keys::otp(email, purpose);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(OtpVerification::Missing);
        };
        let envelope: OtpEnvelope = serde_json::from_slice(&raw)?;
        let OtpEnvelope::V1(mut record) = envelope;

        let now = clock::now();
        let Some(remaining_ttl) = clock::until(record.expires_at, now) else {
            self.store.del(&key).await?;
            return Ok(OtpVerification::Missing);
        };

        if record.attempts >= record.max_attempts {
            self.store.del(&key).await?;
            return Ok(OtpVerification::TooManyAttempts);
        }

        if record.code_hash == Self::hash_code(&key, code) {
            // Only the caller that deletes the exact record it read wins.
            return if self.store.compare_and_delete(&key, raw).await? {
                info!(key = %key, "OTP verified");
                Ok(OtpVerification::Verified)
            } else {
                debug!(key = %key, "OTP consumed concurrently");
                Ok(OtpVerification::Missing)
            };
        }

        record.attempts += 1;
        if record.attempts >= record.max_attempts {
            warn!(key = %key, attempts = record.attempts, "OTP attempt limit reached");
            self.store.del(&key).await?;
            return Ok(OtpVerification::TooManyAttempts);
        }

        let remaining_attempts = record.max_attempts - record.attempts;
        let payload = serde_json::to_vec(&OtpEnvelope::V1(record))?;
        self.store.set_px(&key, payload, remaining_ttl).await?;

        debug!(key = %key, remaining_attempts, "OTP mismatch");
        Ok(OtpVerification::Invalid { remaining_attempts })
    }

    /// Drops the code for `(email, purpose)`. Returns `true` if one existed.
    pub async fn invalidate(&self, email: &str, purpose: &str) -> TollgateResult<bool> {
        Ok(self.store.del(&keys::otp(email, purpose)).await? > 0)
    }

    /// Whether a usable code exists, without counting an attempt.
    pub async fn is_pending(&self, email: &str, purpose: &str) -> TollgateResult<bool> {
        Ok(self.store.exists(&keys::otp(email, purpose)).await?)
    }
}
