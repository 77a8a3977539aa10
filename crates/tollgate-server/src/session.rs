//! Session lifecycle with sliding TTLs.
//!
//! A session lives at `session:{id}` as a versioned JSON envelope. Its
//! subject id is also a member of the `tag:active_sessions` index and an
//! activity hash sits next to it at `session:{id}:activity`.
//!
//! The index is only eventually consistent with the session keys: members
//! stay behind when a session expires by TTL, so [`SessionManager::active_count`]
//! may overcount until [`SessionManager::reconcile_index`] runs. It never
//! undercounts: every write path re-adds the subject to the index.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tollgate_store::{Command, DynStore, Pipeline, PipelineExecutor, Reply, StoreExt};
use tracing::{debug, info, warn};

use crate::clock;
use crate::error::{TollgateError, TollgateResult};
use crate::keys;

/// Members checked per reconcile pipeline.
const RECONCILE_BATCH: usize = 100;

/// Attributes stored for a signed-in subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub principal_id: String,
    pub role: String,
    #[serde(with = "time::serde::rfc3339")]
    pub login_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// User agent or other client descriptor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
}

impl SessionData {
    pub fn new(principal_id: impl Into<String>, role: impl Into<String>) -> Self {
        let now = clock::now();
        Self {
            principal_id: principal_id.into(),
            role: role.into(),
            login_at: now,
            last_activity_at: now,
            origin: None,
            client: None,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "version")]
enum SessionEnvelope {
    #[serde(rename = "1")]
    V1(SessionData),
}

fn encode(data: &SessionData) -> TollgateResult<Vec<u8>> {
    Ok(serde_json::to_vec(&SessionEnvelope::V1(data.clone()))?)
}

fn decode(bytes: &[u8]) -> TollgateResult<SessionData> {
    let envelope: SessionEnvelope = serde_json::from_slice(bytes)?;
    match envelope {
        SessionEnvelope::V1(data) => Ok(data),
    }
}

/// Contents of the activity hash.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionActivity {
    pub last_seen: Option<OffsetDateTime>,
    pub origin: Option<String>,
}

/// Manages session records, the active index and activity hashes.
#[derive(Clone)]
pub struct SessionManager {
    store: DynStore,
    pipeline: PipelineExecutor,
    default_ttl: Duration,
}

impl SessionManager {
    pub fn new(store: DynStore, default_ttl: Duration) -> Self {
        Self {
            pipeline: PipelineExecutor::new(store.clone()),
            store,
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn activity_command(subject_id: &str, origin: Option<&str>) -> Command {
        let last_seen = clock::now().format(&Rfc3339).unwrap_or_default();
        let mut fields = vec![("last_seen", last_seen)];
        if let Some(origin) = origin {
            fields.push(("origin", origin.to_string()));
        }
        Command::hset(keys::session_activity(subject_id), fields)
    }

    /// Writes the session, indexes the subject and records activity in one
    /// round trip.
    ///
    /// Any failed command fails the whole create; commands that did apply
    /// are left in place and expire with their TTLs.
    pub async fn create(
        &self,
        subject_id: &str,
        data: &SessionData,
        ttl: Duration,
    ) -> TollgateResult<()> {
        let key = keys::session(subject_id);
        let activity = keys::session_activity(subject_id);

        let pipeline = Pipeline::new()
            .with(Command::set_px(&key, encode(data)?, ttl))
            .with(Command::sadd(keys::ACTIVE_SESSIONS, subject_id))
            .with(Self::activity_command(subject_id, data.origin.as_deref()))
            .with(Command::pexpire(&activity, ttl));

        let outcome = self.pipeline.execute(pipeline).await;
        if !outcome.success {
            warn!(subject_id, failed = ?outcome.failed_indices(), "Session create failed");
            return Err(TollgateError::from_outcome("session.create", &outcome));
        }

        info!(subject_id, ttl_secs = ttl.as_secs(), "Session created");
        Ok(())
    }

    pub async fn get(&self, subject_id: &str) -> TollgateResult<Option<SessionData>> {
        match self.store.get(&keys::session(subject_id)).await? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Refreshes the last-activity time and restarts the session TTL.
    ///
    /// Returns `false` when no session exists. The rewrite only applies to a
    /// key that still exists, so a `destroy` racing with the touch wins.
    pub async fn touch(&self, subject_id: &str, origin: Option<&str>) -> TollgateResult<bool> {
        let Some(mut data) = self.get(subject_id).await? else {
            debug!(subject_id, "Touch on missing session");
            return Ok(false);
        };

        data.last_activity_at = clock::now();
        if let Some(origin) = origin {
            data.origin = Some(origin.to_string());
        }

        let ttl = self.default_ttl;
        let refreshed = self
            .store
            .set_xx_px(&keys::session(subject_id), encode(&data)?, ttl)
            .await?;
        if !refreshed {
            debug!(subject_id, "Session went away during touch");
            return Ok(false);
        }

        let pipeline = Pipeline::new()
            .with(Command::sadd(keys::ACTIVE_SESSIONS, subject_id))
            .with(Self::activity_command(subject_id, origin))
            .with(Command::pexpire(keys::session_activity(subject_id), ttl));

        let outcome = self.pipeline.execute(pipeline).await;
        if !outcome.success {
            return Err(TollgateError::from_outcome("session.touch", &outcome));
        }
        Ok(true)
    }

    /// Sets a new TTL on the session and its activity record.
    ///
    /// Returns `false` when no session exists.
    pub async fn extend(&self, subject_id: &str, ttl: Duration) -> TollgateResult<bool> {
        let mut outcome = self
            .pipeline
            .execute(
                Pipeline::new()
                    .with(Command::pexpire(keys::session(subject_id), ttl))
                    .with(Command::pexpire(keys::session_activity(subject_id), ttl)),
            )
            .await;

        let extended = outcome.take(0)?.into_bool()?;
        if let Some(error) = outcome.errors[1].as_ref() {
            warn!(subject_id, error = %error, "Failed to extend session activity");
        }
        Ok(extended)
    }

    /// Removes the session, its activity record and its index entry.
    ///
    /// Destroying a session that does not exist is not an error.
    pub async fn destroy(&self, subject_id: &str) -> TollgateResult<()> {
        let pipeline = Pipeline::new()
            .with(Command::del_many([
                keys::session(subject_id),
                keys::session_activity(subject_id),
            ]))
            .with(Command::srem(keys::ACTIVE_SESSIONS, [subject_id]));

        let outcome = self.pipeline.execute(pipeline).await;
        if !outcome.success {
            return Err(TollgateError::from_outcome("session.destroy", &outcome));
        }
        info!(subject_id, "Session destroyed");
        Ok(())
    }

    /// Size of the active index. May overcount; never undercounts.
    pub async fn active_count(&self) -> TollgateResult<u64> {
        Ok(self.store.scard(keys::ACTIVE_SESSIONS).await?)
    }

    /// Members of the active index, sorted.
    pub async fn active_subjects(&self) -> TollgateResult<Vec<String>> {
        let mut subjects = self.store.smembers(keys::ACTIVE_SESSIONS).await?;
        subjects.sort();
        Ok(subjects)
    }

    pub async fn activity(&self, subject_id: &str) -> TollgateResult<Option<SessionActivity>> {
        let fields = self
            .store
            .hgetall(&keys::session_activity(subject_id))
            .await?;
        if fields.is_empty() {
            return Ok(None);
        }

        let mut activity = SessionActivity::default();
        for (field, value) in fields {
            let value = String::from_utf8_lossy(&value).into_owned();
            match field.as_str() {
                "last_seen" => activity.last_seen = OffsetDateTime::parse(&value, &Rfc3339).ok(),
                "origin" => activity.origin = Some(value),
                _ => {}
            }
        }
        Ok(Some(activity))
    }

    /// Drops index members whose session key no longer exists.
    ///
    /// Each member is removed by a single conditional command that checks
    /// the session key at the moment of removal, so a subject re-created
    /// while the sweep runs keeps its index entry.
    ///
    /// Returns the number of members removed.
    pub async fn reconcile_index(&self) -> TollgateResult<usize> {
        let members = self.store.smembers(keys::ACTIVE_SESSIONS).await?;
        let mut removed = 0usize;

        for chunk in members.chunks(RECONCILE_BATCH) {
            let pipeline: Pipeline = chunk
                .iter()
                .map(|m| Command::srem_if_missing(keys::ACTIVE_SESSIONS, m, keys::session(m)))
                .collect();
            let outcome = self.pipeline.execute(pipeline).await;
            if let Some(error) = outcome.first_error() {
                if error.is_transient() {
                    return Err(error.clone().into());
                }
            }

            removed += outcome
                .results
                .into_iter()
                .filter(|result| matches!(result, Some(Reply::Int(n)) if *n > 0))
                .count();
        }

        if removed > 0 {
            debug!(removed, "Active session index reconciled");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_envelope_carries_version() {
        let data = SessionData {
            principal_id: "p-1".into(),
            role: "admin".into(),
            login_at: datetime!(2024-01-01 10:00:00 UTC),
            last_activity_at: datetime!(2024-01-01 10:05:00 UTC),
            origin: Some("10.0.0.1".into()),
            client: None,
        };
        let bytes = encode(&data).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["version"], "1");
        assert_eq!(json["role"], "admin");
        assert!(json.get("client").is_none());
        assert_eq!(decode(&bytes).unwrap(), data);
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let raw = br#"{"version":"9","principal_id":"p","role":"r"}"#;
        assert!(matches!(
            decode(raw),
            Err(TollgateError::Serialization(_))
        ));
    }
}
