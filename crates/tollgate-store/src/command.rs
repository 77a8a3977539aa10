//! Command and reply model shared by every store backend.
//!
//! Commands mirror the subset of the Redis command set the control core
//! needs. Replies follow the RESP2 shapes so that backends can be swapped
//! without callers noticing: `HGETALL` and `ZRANGE ... WITHSCORES` return
//! flat arrays, `SCAN` returns `[cursor, [keys...]]`.

use std::time::Duration;

use crate::StoreResult;
use crate::error::StoreError;

/// A single store command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Get {
        key: String,
    },
    Set {
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
        condition: SetCondition,
    },
    Del {
        keys: Vec<String>,
    },
    Exists {
        key: String,
    },
    PExpire {
        key: String,
        ttl: Duration,
    },
    PTtl {
        key: String,
    },
    Incr {
        key: String,
    },
    HSet {
        key: String,
        fields: Vec<(String, Vec<u8>)>,
    },
    HGet {
        key: String,
        field: String,
    },
    HGetAll {
        key: String,
    },
    SAdd {
        key: String,
        members: Vec<String>,
    },
    SRem {
        key: String,
        members: Vec<String>,
    },
    SMembers {
        key: String,
    },
    SCard {
        key: String,
    },
    ZAdd {
        key: String,
        score: f64,
        member: String,
    },
    /// Removes members whose score lies in `[min, max]`.
    ZRemRangeByScore {
        key: String,
        min: f64,
        max: f64,
    },
    ZCard {
        key: String,
    },
    /// `ZRANGE key start stop WITHSCORES`, ranks ordered by ascending score.
    ZRangeWithScores {
        key: String,
        start: i64,
        stop: i64,
    },
    Scan {
        cursor: u64,
        pattern: String,
        count: usize,
    },
    /// Deletes `key` only when its current value equals `expected`.
    ///
    /// Backends must perform the comparison and the delete atomically.
    CompareAndDelete {
        key: String,
        expected: Vec<u8>,
    },
    /// Removes `member` from the set at `key` only while `witness` does not
    /// exist. Replies with the number of members removed.
    ///
    /// Backends must check `witness` and update the set atomically.
    SRemIfMissing {
        key: String,
        member: String,
        witness: String,
    },
    /// Sliding-window admission on the sorted set at `key`, applied as one
    /// step: drop entries scored at or below `now_ms - window`, count the
    /// rest, and when fewer than `max` remain add `member` at `now_ms` and
    /// reset the key TTL to `window`.
    ///
    /// Replies `[admitted (0|1), count before admission, oldest score | nil]`.
    SlidingWindowAdmit {
        key: String,
        now_ms: i64,
        window: Duration,
        max: u64,
        member: String,
    },
    /// `INCR` that opens a window: a counter left without a TTL (fresh, or
    /// one whose expiry was lost) gets `window` in the same step.
    ///
    /// Replies `[count, remaining ttl in ms]`.
    IncrWindow {
        key: String,
        window: Duration,
    },
    Ping,
    DbSize,
    Info,
}

/// Existence precondition of a `SET`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SetCondition {
    #[default]
    Always,
    /// `NX`: only write a key that does not exist.
    IfAbsent,
    /// `XX`: only overwrite a key that exists.
    IfPresent,
}

/// Coarse classification used by metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Point lookups that can hit or miss.
    Read,
    /// Commands that create or modify data.
    Write,
    /// Commands that remove data.
    Delete,
    /// Everything else (introspection, counting, scanning).
    Other,
}

impl Command {
    pub fn get(key: impl Into<String>) -> Self {
        Self::Get { key: key.into() }
    }

    pub fn set(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self::Set {
            key: key.into(),
            value: value.into(),
            ttl: None,
            condition: SetCondition::Always,
        }
    }

    /// `SET key value PX ttl`.
    pub fn set_px(key: impl Into<String>, value: impl Into<Vec<u8>>, ttl: Duration) -> Self {
        Self::Set {
            key: key.into(),
            value: value.into(),
            ttl: Some(ttl),
            condition: SetCondition::Always,
        }
    }

    /// `SET key value NX PX ttl`.
    pub fn set_nx_px(key: impl Into<String>, value: impl Into<Vec<u8>>, ttl: Duration) -> Self {
        Self::Set {
            key: key.into(),
            value: value.into(),
            ttl: Some(ttl),
            condition: SetCondition::IfAbsent,
        }
    }

    /// `SET key value XX PX ttl`.
    pub fn set_xx_px(key: impl Into<String>, value: impl Into<Vec<u8>>, ttl: Duration) -> Self {
        Self::Set {
            key: key.into(),
            value: value.into(),
            ttl: Some(ttl),
            condition: SetCondition::IfPresent,
        }
    }

    pub fn del(key: impl Into<String>) -> Self {
        Self::Del {
            keys: vec![key.into()],
        }
    }

    pub fn del_many<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self::Del {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn exists(key: impl Into<String>) -> Self {
        Self::Exists { key: key.into() }
    }

    pub fn pexpire(key: impl Into<String>, ttl: Duration) -> Self {
        Self::PExpire {
            key: key.into(),
            ttl,
        }
    }

    pub fn pttl(key: impl Into<String>) -> Self {
        Self::PTtl { key: key.into() }
    }

    pub fn incr(key: impl Into<String>) -> Self {
        Self::Incr { key: key.into() }
    }

    pub fn hset<I, F, V>(key: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<String>,
        V: Into<Vec<u8>>,
    {
        Self::HSet {
            key: key.into(),
            fields: fields
                .into_iter()
                .map(|(f, v)| (f.into(), v.into()))
                .collect(),
        }
    }

    pub fn hget(key: impl Into<String>, field: impl Into<String>) -> Self {
        Self::HGet {
            key: key.into(),
            field: field.into(),
        }
    }

    pub fn hgetall(key: impl Into<String>) -> Self {
        Self::HGetAll { key: key.into() }
    }

    pub fn sadd(key: impl Into<String>, member: impl Into<String>) -> Self {
        Self::SAdd {
            key: key.into(),
            members: vec![member.into()],
        }
    }

    pub fn srem<I, M>(key: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<String>,
    {
        Self::SRem {
            key: key.into(),
            members: members.into_iter().map(Into::into).collect(),
        }
    }

    pub fn smembers(key: impl Into<String>) -> Self {
        Self::SMembers { key: key.into() }
    }

    pub fn scard(key: impl Into<String>) -> Self {
        Self::SCard { key: key.into() }
    }

    pub fn zadd(key: impl Into<String>, score: f64, member: impl Into<String>) -> Self {
        Self::ZAdd {
            key: key.into(),
            score,
            member: member.into(),
        }
    }

    pub fn zremrangebyscore(key: impl Into<String>, min: f64, max: f64) -> Self {
        Self::ZRemRangeByScore {
            key: key.into(),
            min,
            max,
        }
    }

    pub fn zcard(key: impl Into<String>) -> Self {
        Self::ZCard { key: key.into() }
    }

    pub fn zrange_withscores(key: impl Into<String>, start: i64, stop: i64) -> Self {
        Self::ZRangeWithScores {
            key: key.into(),
            start,
            stop,
        }
    }

    pub fn scan(cursor: u64, pattern: impl Into<String>, count: usize) -> Self {
        Self::Scan {
            cursor,
            pattern: pattern.into(),
            count,
        }
    }

    pub fn compare_and_delete(key: impl Into<String>, expected: impl Into<Vec<u8>>) -> Self {
        Self::CompareAndDelete {
            key: key.into(),
            expected: expected.into(),
        }
    }

    pub fn srem_if_missing(
        key: impl Into<String>,
        member: impl Into<String>,
        witness: impl Into<String>,
    ) -> Self {
        Self::SRemIfMissing {
            key: key.into(),
            member: member.into(),
            witness: witness.into(),
        }
    }

    pub fn sliding_window_admit(
        key: impl Into<String>,
        now_ms: i64,
        window: Duration,
        max: u64,
        member: impl Into<String>,
    ) -> Self {
        Self::SlidingWindowAdmit {
            key: key.into(),
            now_ms,
            window,
            max,
            member: member.into(),
        }
    }

    pub fn incr_window(key: impl Into<String>, window: Duration) -> Self {
        Self::IncrWindow {
            key: key.into(),
            window,
        }
    }

    /// Command name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Get { .. } => "GET",
            Self::Set { .. } => "SET",
            Self::Del { .. } => "DEL",
            Self::Exists { .. } => "EXISTS",
            Self::PExpire { .. } => "PEXPIRE",
            Self::PTtl { .. } => "PTTL",
            Self::Incr { .. } => "INCR",
            Self::HSet { .. } => "HSET",
            Self::HGet { .. } => "HGET",
            Self::HGetAll { .. } => "HGETALL",
            Self::SAdd { .. } => "SADD",
            Self::SRem { .. } => "SREM",
            Self::SMembers { .. } => "SMEMBERS",
            Self::SCard { .. } => "SCARD",
            Self::ZAdd { .. } => "ZADD",
            Self::ZRemRangeByScore { .. } => "ZREMRANGEBYSCORE",
            Self::ZCard { .. } => "ZCARD",
            Self::ZRangeWithScores { .. } => "ZRANGE",
            Self::Scan { .. } => "SCAN",
            Self::CompareAndDelete { .. } => "CAD",
            Self::SRemIfMissing { .. } => "SREMIFMISSING",
            Self::SlidingWindowAdmit { .. } => "SLIDINGWINDOW",
            Self::IncrWindow { .. } => "INCRWINDOW",
            Self::Ping => "PING",
            Self::DbSize => "DBSIZE",
            Self::Info => "INFO",
        }
    }

    /// Primary key touched by the command, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Get { key }
            | Self::Set { key, .. }
            | Self::Exists { key }
            | Self::PExpire { key, .. }
            | Self::PTtl { key }
            | Self::Incr { key }
            | Self::HSet { key, .. }
            | Self::HGet { key, .. }
            | Self::HGetAll { key }
            | Self::SAdd { key, .. }
            | Self::SRem { key, .. }
            | Self::SMembers { key }
            | Self::SCard { key }
            | Self::ZAdd { key, .. }
            | Self::ZRemRangeByScore { key, .. }
            | Self::ZCard { key }
            | Self::ZRangeWithScores { key, .. }
            | Self::CompareAndDelete { key, .. }
            | Self::SRemIfMissing { key, .. }
            | Self::SlidingWindowAdmit { key, .. }
            | Self::IncrWindow { key, .. } => Some(key),
            Self::Del { keys } => keys.first().map(String::as_str),
            Self::Scan { .. } | Self::Ping | Self::DbSize | Self::Info => None,
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Get { .. } | Self::HGet { .. } | Self::HGetAll { .. } => CommandKind::Read,
            Self::Set { .. }
            | Self::PExpire { .. }
            | Self::Incr { .. }
            | Self::HSet { .. }
            | Self::SAdd { .. }
            | Self::ZAdd { .. }
            | Self::SlidingWindowAdmit { .. }
            | Self::IncrWindow { .. } => CommandKind::Write,
            Self::Del { .. }
            | Self::SRem { .. }
            | Self::ZRemRangeByScore { .. }
            | Self::CompareAndDelete { .. }
            | Self::SRemIfMissing { .. } => CommandKind::Delete,
            _ => CommandKind::Other,
        }
    }
}

/// A reply to a single command.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Nil,
    Ok,
    Int(i64),
    Bytes(Vec<u8>),
    Array(Vec<Reply>),
}

impl Reply {
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Reports whether a read command found something.
    ///
    /// `HGETALL` on a missing key returns an empty array rather than nil.
    pub fn is_hit(&self) -> bool {
        match self {
            Self::Nil => false,
            Self::Array(items) => !items.is_empty(),
            _ => true,
        }
    }

    pub fn into_int(self) -> StoreResult<i64> {
        match self {
            Self::Int(n) => Ok(n),
            Self::Bytes(b) => std::str::from_utf8(&b)
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .ok_or_else(|| StoreError::protocol("expected integer reply")),
            other => Err(unexpected("integer", &other)),
        }
    }

    /// Interprets `1`/`0` integer replies and `OK`/nil status replies.
    pub fn into_bool(self) -> StoreResult<bool> {
        match self {
            Self::Int(n) => Ok(n > 0),
            Self::Ok => Ok(true),
            Self::Nil => Ok(false),
            other => Err(unexpected("boolean", &other)),
        }
    }

    pub fn into_bytes(self) -> StoreResult<Option<Vec<u8>>> {
        match self {
            Self::Nil => Ok(None),
            Self::Bytes(b) => Ok(Some(b)),
            Self::Ok => Ok(Some(b"OK".to_vec())),
            Self::Int(n) => Ok(Some(n.to_string().into_bytes())),
            other => Err(unexpected("bulk string", &other)),
        }
    }

    pub fn into_string(self) -> StoreResult<Option<String>> {
        self.into_bytes()?
            .map(|b| String::from_utf8(b).map_err(|_| StoreError::protocol("reply is not UTF-8")))
            .transpose()
    }

    pub fn into_array(self) -> StoreResult<Vec<Reply>> {
        match self {
            Self::Nil => Ok(Vec::new()),
            Self::Array(items) => Ok(items),
            other => Err(unexpected("array", &other)),
        }
    }

    pub fn into_strings(self) -> StoreResult<Vec<String>> {
        match self {
            Self::Nil => Ok(Vec::new()),
            Self::Array(items) => items
                .into_iter()
                .map(|item| {
                    item.into_string()?
                        .ok_or_else(|| StoreError::protocol("nil element in array reply"))
                })
                .collect(),
            other => Err(unexpected("array", &other)),
        }
    }

    /// Decodes a flat `[field, value, field, value, ...]` reply.
    pub fn into_pairs(self) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let items = match self {
            Self::Nil => return Ok(Vec::new()),
            Self::Array(items) => items,
            other => return Err(unexpected("array", &other)),
        };
        if items.len() % 2 != 0 {
            return Err(StoreError::protocol("odd number of elements in pair reply"));
        }
        let mut pairs = Vec::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
            let field = field
                .into_string()?
                .ok_or_else(|| StoreError::protocol("nil field name"))?;
            let value = value.into_bytes()?.unwrap_or_default();
            pairs.push((field, value));
        }
        Ok(pairs)
    }

    /// Decodes a `ZRANGE ... WITHSCORES` reply into `(member, score)` pairs.
    pub fn into_scored(self) -> StoreResult<Vec<(String, f64)>> {
        self.into_pairs()?
            .into_iter()
            .map(|(member, score)| {
                let score = std::str::from_utf8(&score)
                    .ok()
                    .and_then(|s| s.parse::<f64>().ok())
                    .ok_or_else(|| StoreError::protocol("score is not a number"))?;
                Ok((member, score))
            })
            .collect()
    }

    /// Decodes a `SCAN` reply into the next cursor and the batch of keys.
    pub fn into_scan(self) -> StoreResult<(u64, Vec<String>)> {
        match self {
            Self::Array(mut items) if items.len() == 2 => {
                let keys = items.pop().map(Reply::into_strings).transpose()?;
                let cursor = items.pop().map(Reply::into_int).transpose()?;
                match (cursor, keys) {
                    (Some(cursor), Some(keys)) => Ok((cursor as u64, keys)),
                    _ => Err(StoreError::protocol("malformed SCAN reply")),
                }
            }
            other => Err(unexpected("SCAN", &other)),
        }
    }
}

fn unexpected(expected: &str, got: &Reply) -> StoreError {
    StoreError::protocol(format!("expected {expected} reply, got {got:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_metadata() {
        let cmd = Command::set_nx_px("lock:a", "t", Duration::from_secs(1));
        assert_eq!(cmd.name(), "SET");
        assert_eq!(cmd.key(), Some("lock:a"));
        assert_eq!(cmd.kind(), CommandKind::Write);

        assert_eq!(Command::get("k").kind(), CommandKind::Read);
        assert_eq!(
            Command::compare_and_delete("k", "v").kind(),
            CommandKind::Delete
        );
        assert_eq!(Command::Info.key(), None);

        let idx = Command::srem_if_missing("tag:active_sessions", "u1", "session:u1");
        assert_eq!(idx.key(), Some("tag:active_sessions"));
        assert_eq!(idx.kind(), CommandKind::Delete);
    }

    #[test]
    fn test_pairs_and_scores() {
        let reply = Reply::Array(vec![
            Reply::Bytes(b"a".to_vec()),
            Reply::Bytes(b"1.5".to_vec()),
            Reply::Bytes(b"b".to_vec()),
            Reply::Bytes(b"2".to_vec()),
        ]);
        let scored = reply.into_scored().unwrap();
        assert_eq!(scored, vec![("a".to_string(), 1.5), ("b".to_string(), 2.0)]);

        let odd = Reply::Array(vec![Reply::Bytes(b"a".to_vec())]);
        assert!(odd.into_pairs().is_err());
    }

    #[test]
    fn test_scan_reply() {
        let reply = Reply::Array(vec![
            Reply::Bytes(b"17".to_vec()),
            Reply::Array(vec![Reply::Bytes(b"otp:a:login".to_vec())]),
        ]);
        let (cursor, keys) = reply.into_scan().unwrap();
        assert_eq!(cursor, 17);
        assert_eq!(keys, vec!["otp:a:login".to_string()]);
    }

    #[test]
    fn test_hit_detection() {
        assert!(!Reply::Nil.is_hit());
        assert!(!Reply::Array(vec![]).is_hit());
        assert!(Reply::Bytes(vec![]).is_hit());
    }
}
