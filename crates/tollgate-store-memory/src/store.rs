use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use parking_lot::RwLock;
use tollgate_store::{Command, KeyValueStore, Reply, SetCondition, StoreError, StoreResult};

use crate::glob::glob_match;

/// A stored value with its optional expiry deadline.
#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }

    fn approximate_size(&self, key: &str) -> usize {
        key.len()
            + match &self.value {
                Value::Str(b) => b.len(),
                Value::Hash(h) => h.iter().map(|(f, v)| f.len() + v.len()).sum(),
                Value::Set(s) => s.iter().map(String::len).sum(),
                Value::ZSet(z) => z.keys().map(|m| m.len() + 8).sum(),
            }
    }
}

#[derive(Debug, Clone)]
enum Value {
    Str(Vec<u8>),
    Hash(HashMap<String, Vec<u8>>),
    Set(HashSet<String>),
    ZSet(HashMap<String, f64>),
}

/// In-process key-value store with Redis command semantics.
///
/// Each command is atomic on its key (DashMap shard locking); batches run
/// commands one after another with no cross-key isolation, matching a
/// pipelined Redis connection. Commands that read one key and write another
/// ([`Command::SRemIfMissing`]) hold the store exclusively, the way a Redis
/// script does. Expired entries are dropped lazily on access
/// and by [`purge_expired`](Self::purge_expired).
#[derive(Debug)]
pub struct MemoryStore {
    data: DashMap<String, Entry>,
    /// Shared by single-key commands, exclusive for cross-key ones.
    exclusive: RwLock<()>,
    started_at: Instant,
    commands_processed: AtomicU64,
    expired_keys: AtomicU64,
    keyspace_hits: AtomicU64,
    keyspace_misses: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            exclusive: RwLock::new(()),
            started_at: Instant::now(),
            commands_processed: AtomicU64::new(0),
            expired_keys: AtomicU64::new(0),
            keyspace_hits: AtomicU64::new(0),
            keyspace_misses: AtomicU64::new(0),
        }
    }

    /// Number of live (non-expired) keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.data.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.data.len();
        self.data.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.data.len());
        self.expired_keys
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Drops `key` if it has expired.
    fn expire_key(&self, key: &str) {
        let now = Instant::now();
        if self
            .data
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            self.expired_keys.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_lookup(&self, hit: bool) {
        let counter = if hit {
            &self.keyspace_hits
        } else {
            &self.keyspace_misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn apply_isolated(&self, command: Command) -> StoreResult<Reply> {
        if matches!(command, Command::SRemIfMissing { .. }) {
            let _held = self.exclusive.write();
            self.apply(command)
        } else {
            let _held = self.exclusive.read();
            self.apply(command)
        }
    }

    fn srem(&self, key: String, members: &[String]) -> StoreResult<Reply> {
        let (removed, now_empty) = match self.data.get_mut(&key) {
            None => return Ok(Reply::Int(0)),
            Some(mut entry) => match &mut entry.value {
                Value::Set(set) => {
                    let removed = members.iter().filter(|m| set.remove(*m)).count();
                    (removed, set.is_empty())
                }
                _ => return Err(StoreError::wrong_type()),
            },
        };
        if now_empty {
            self.data.remove_if(&key, |_, e| matches!(&e.value, Value::Set(s) if s.is_empty()));
        }
        Ok(Reply::Int(removed as i64))
    }

    fn apply(&self, command: Command) -> StoreResult<Reply> {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
        if let Some(key) = command.key() {
            self.expire_key(key);
        }

        match command {
            Command::Get { key } => {
                let reply = match self.data.get(&key) {
                    None => Reply::Nil,
                    Some(entry) => match &entry.value {
                        Value::Str(b) => Reply::Bytes(b.clone()),
                        _ => return Err(StoreError::wrong_type()),
                    },
                };
                self.record_lookup(!reply.is_nil());
                Ok(reply)
            }
            Command::Set {
                key,
                value,
                ttl,
                condition,
            } => match self.data.entry(key) {
                MapEntry::Occupied(_) if condition == SetCondition::IfAbsent => Ok(Reply::Nil),
                MapEntry::Occupied(mut occupied) => {
                    occupied.insert(Entry::new(Value::Str(value), ttl));
                    Ok(Reply::Ok)
                }
                MapEntry::Vacant(_) if condition == SetCondition::IfPresent => Ok(Reply::Nil),
                MapEntry::Vacant(vacant) => {
                    vacant.insert(Entry::new(Value::Str(value), ttl));
                    Ok(Reply::Ok)
                }
            },
            Command::Del { keys } => {
                let mut removed = 0;
                for key in keys {
                    self.expire_key(&key);
                    if self.data.remove(&key).is_some() {
                        removed += 1;
                    }
                }
                Ok(Reply::Int(removed))
            }
            Command::Exists { key } => Ok(Reply::Int(i64::from(self.data.contains_key(&key)))),
            Command::PExpire { key, ttl } => {
                if ttl.is_zero() {
                    return Ok(Reply::Int(i64::from(self.data.remove(&key).is_some())));
                }
                match self.data.get_mut(&key) {
                    Some(mut entry) => {
                        entry.expires_at = Some(Instant::now() + ttl);
                        Ok(Reply::Int(1))
                    }
                    None => Ok(Reply::Int(0)),
                }
            }
            Command::PTtl { key } => {
                let now = Instant::now();
                Ok(Reply::Int(match self.data.get(&key) {
                    None => -2,
                    Some(entry) => match entry.expires_at {
                        None => -1,
                        Some(deadline) => deadline.saturating_duration_since(now).as_millis() as i64,
                    },
                }))
            }
            Command::Incr { key } => match self.data.entry(key) {
                MapEntry::Vacant(vacant) => {
                    vacant.insert(Entry::new(Value::Str(b"1".to_vec()), None));
                    Ok(Reply::Int(1))
                }
                MapEntry::Occupied(mut occupied) => match &mut occupied.get_mut().value {
                    Value::Str(bytes) => {
                        let current: i64 = std::str::from_utf8(bytes)
                            .ok()
                            .and_then(|s| s.parse().ok())
                            .ok_or_else(|| {
                                StoreError::operation("ERR value is not an integer or out of range")
                            })?;
                        let next = current
                            .checked_add(1)
                            .ok_or_else(|| StoreError::operation("ERR increment or decrement would overflow"))?;
                        *bytes = next.to_string().into_bytes();
                        Ok(Reply::Int(next))
                    }
                    _ => Err(StoreError::wrong_type()),
                },
            },
            Command::HSet { key, fields } => {
                let mut entry = self
                    .data
                    .entry(key)
                    .or_insert_with(|| Entry::new(Value::Hash(HashMap::new()), None));
                match &mut entry.value {
                    Value::Hash(hash) => {
                        let added = fields
                            .into_iter()
                            .filter(|(field, value)| hash.insert(field.clone(), value.clone()).is_none())
                            .count();
                        Ok(Reply::Int(added as i64))
                    }
                    _ => Err(StoreError::wrong_type()),
                }
            }
            Command::HGet { key, field } => {
                let reply = match self.data.get(&key) {
                    None => Reply::Nil,
                    Some(entry) => match &entry.value {
                        Value::Hash(hash) => hash
                            .get(&field)
                            .map(|v| Reply::Bytes(v.clone()))
                            .unwrap_or(Reply::Nil),
                        _ => return Err(StoreError::wrong_type()),
                    },
                };
                self.record_lookup(!reply.is_nil());
                Ok(reply)
            }
            Command::HGetAll { key } => {
                let reply = match self.data.get(&key) {
                    None => Reply::Array(Vec::new()),
                    Some(entry) => match &entry.value {
                        Value::Hash(hash) => {
                            let mut fields: Vec<_> = hash.iter().collect();
                            fields.sort_by(|a, b| a.0.cmp(b.0));
                            Reply::Array(
                                fields
                                    .into_iter()
                                    .flat_map(|(f, v)| {
                                        [Reply::Bytes(f.clone().into_bytes()), Reply::Bytes(v.clone())]
                                    })
                                    .collect(),
                            )
                        }
                        _ => return Err(StoreError::wrong_type()),
                    },
                };
                self.record_lookup(reply.is_hit());
                Ok(reply)
            }
            Command::SAdd { key, members } => {
                let mut entry = self
                    .data
                    .entry(key)
                    .or_insert_with(|| Entry::new(Value::Set(HashSet::new()), None));
                match &mut entry.value {
                    Value::Set(set) => {
                        let added = members.into_iter().filter(|m| set.insert(m.clone())).count();
                        Ok(Reply::Int(added as i64))
                    }
                    _ => Err(StoreError::wrong_type()),
                }
            }
            Command::SRem { key, members } => self.srem(key, &members),
            Command::SRemIfMissing {
                key,
                member,
                witness,
            } => {
                self.expire_key(&witness);
                if self.data.contains_key(&witness) {
                    Ok(Reply::Int(0))
                } else {
                    self.srem(key, &[member])
                }
            }
            Command::SMembers { key } => match self.data.get(&key) {
                None => Ok(Reply::Array(Vec::new())),
                Some(entry) => match &entry.value {
                    Value::Set(set) => {
                        let mut members: Vec<_> = set.iter().cloned().collect();
                        members.sort();
                        Ok(Reply::Array(
                            members
                                .into_iter()
                                .map(|m| Reply::Bytes(m.into_bytes()))
                                .collect(),
                        ))
                    }
                    _ => Err(StoreError::wrong_type()),
                },
            },
            Command::SCard { key } => match self.data.get(&key) {
                None => Ok(Reply::Int(0)),
                Some(entry) => match &entry.value {
                    Value::Set(set) => Ok(Reply::Int(set.len() as i64)),
                    _ => Err(StoreError::wrong_type()),
                },
            },
            Command::ZAdd { key, score, member } => {
                if score.is_nan() {
                    return Err(StoreError::operation("ERR value is not a valid float"));
                }
                let mut entry = self
                    .data
                    .entry(key)
                    .or_insert_with(|| Entry::new(Value::ZSet(HashMap::new()), None));
                match &mut entry.value {
                    Value::ZSet(zset) => Ok(Reply::Int(i64::from(zset.insert(member, score).is_none()))),
                    _ => Err(StoreError::wrong_type()),
                }
            }
            Command::ZRemRangeByScore { key, min, max } => {
                let (removed, now_empty) = match self.data.get_mut(&key) {
                    None => return Ok(Reply::Int(0)),
                    Some(mut entry) => match &mut entry.value {
                        Value::ZSet(zset) => {
                            let before = zset.len();
                            zset.retain(|_, score| *score < min || *score > max);
                            (before - zset.len(), zset.is_empty())
                        }
                        _ => return Err(StoreError::wrong_type()),
                    },
                };
                if now_empty {
                    self.data.remove_if(&key, |_, e| matches!(&e.value, Value::ZSet(z) if z.is_empty()));
                }
                Ok(Reply::Int(removed as i64))
            }
            Command::ZCard { key } => match self.data.get(&key) {
                None => Ok(Reply::Int(0)),
                Some(entry) => match &entry.value {
                    Value::ZSet(zset) => Ok(Reply::Int(zset.len() as i64)),
                    _ => Err(StoreError::wrong_type()),
                },
            },
            Command::ZRangeWithScores { key, start, stop } => match self.data.get(&key) {
                None => Ok(Reply::Array(Vec::new())),
                Some(entry) => match &entry.value {
                    Value::ZSet(zset) => {
                        let mut ranked: Vec<_> = zset.iter().collect();
                        ranked.sort_by(|a, b| a.1.total_cmp(b.1).then_with(|| a.0.cmp(b.0)));
                        let Some((from, to)) = rank_range(ranked.len(), start, stop) else {
                            return Ok(Reply::Array(Vec::new()));
                        };
                        Ok(Reply::Array(
                            ranked[from..=to]
                                .iter()
                                .flat_map(|(member, score)| {
                                    [
                                        Reply::Bytes(member.as_bytes().to_vec()),
                                        Reply::Bytes(score.to_string().into_bytes()),
                                    ]
                                })
                                .collect(),
                        ))
                    }
                    _ => Err(StoreError::wrong_type()),
                },
            },
            Command::Scan {
                cursor,
                pattern,
                count,
            } => {
                let now = Instant::now();
                let mut keys: Vec<String> = self
                    .data
                    .iter()
                    .filter(|e| !e.is_expired(now) && glob_match(&pattern, e.key()))
                    .map(|e| e.key().clone())
                    .collect();
                keys.sort();
                let from = (cursor as usize).min(keys.len());
                let to = from.saturating_add(count.max(1)).min(keys.len());
                let next = if to >= keys.len() { 0 } else { to as u64 };
                Ok(Reply::Array(vec![
                    Reply::Bytes(next.to_string().into_bytes()),
                    Reply::Array(
                        keys[from..to]
                            .iter()
                            .map(|k| Reply::Bytes(k.clone().into_bytes()))
                            .collect(),
                    ),
                ]))
            }
            Command::CompareAndDelete { key, expected } => {
                let removed = self
                    .data
                    .remove_if(&key, |_, entry| {
                        matches!(&entry.value, Value::Str(current) if *current == expected)
                    })
                    .is_some();
                Ok(Reply::Int(i64::from(removed)))
            }
            Command::SlidingWindowAdmit {
                key,
                now_ms,
                window,
                max,
                member,
            } => self.sliding_window_admit(key, now_ms, window, max, member),
            Command::IncrWindow { key, window } => self.incr_window(key, window),
            Command::Ping => Ok(Reply::Bytes(b"PONG".to_vec())),
            Command::DbSize => Ok(Reply::Int(self.len() as i64)),
            Command::Info => Ok(Reply::Bytes(self.info().into_bytes())),
        }
    }

    fn sliding_window_admit(
        &self,
        key: String,
        now_ms: i64,
        window: Duration,
        max: u64,
        member: String,
    ) -> StoreResult<Reply> {
        let cutoff = (now_ms - window.as_millis() as i64) as f64;
        let admit = |count: usize| (count as u64) < max;
        let reply = |admitted: bool, count: usize, oldest: Option<f64>| {
            Reply::Array(vec![
                Reply::Int(i64::from(admitted)),
                Reply::Int(count as i64),
                oldest.map_or(Reply::Nil, |score| Reply::Bytes(score.to_string().into_bytes())),
            ])
        };

        match self.data.entry(key) {
            MapEntry::Vacant(vacant) => {
                let admitted = admit(0);
                if admitted {
                    let zset = HashMap::from([(member, now_ms as f64)]);
                    vacant.insert(Entry::new(Value::ZSet(zset), Some(window)));
                }
                Ok(reply(admitted, 0, None))
            }
            MapEntry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                let Value::ZSet(zset) = &mut entry.value else {
                    return Err(StoreError::wrong_type());
                };
                zset.retain(|_, score| *score < 0.0 || *score > cutoff);
                let count = zset.len();
                let oldest = zset.values().copied().min_by(f64::total_cmp);
                let admitted = admit(count);
                if admitted {
                    zset.insert(member, now_ms as f64);
                    entry.expires_at = Some(Instant::now() + window);
                } else if count == 0 {
                    occupied.remove();
                }
                Ok(reply(admitted, count, oldest))
            }
        }
    }

    fn incr_window(&self, key: String, window: Duration) -> StoreResult<Reply> {
        let now = Instant::now();
        let window_ms = window.as_millis() as i64;
        match self.data.entry(key) {
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry::new(Value::Str(b"1".to_vec()), Some(window)));
                Ok(Reply::Array(vec![Reply::Int(1), Reply::Int(window_ms)]))
            }
            MapEntry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                let Value::Str(bytes) = &mut entry.value else {
                    return Err(StoreError::wrong_type());
                };
                let next = std::str::from_utf8(bytes)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .and_then(|n| n.checked_add(1))
                    .ok_or_else(|| StoreError::operation("ERR value is not an integer or out of range"))?;
                *bytes = next.to_string().into_bytes();
                let deadline = *entry.expires_at.get_or_insert(now + window);
                let ttl_ms = deadline.saturating_duration_since(now).as_millis() as i64;
                Ok(Reply::Array(vec![Reply::Int(next), Reply::Int(ttl_ms)]))
            }
        }
    }

    /// Renders an `INFO`-formatted report of the store.
    fn info(&self) -> String {
        let now = Instant::now();
        let used_memory: usize = self
            .data
            .iter()
            .filter(|e| !e.is_expired(now))
            .map(|e| e.approximate_size(e.key()))
            .sum();
        let uptime = self.started_at.elapsed();
        let processed = self.commands_processed.load(Ordering::Relaxed);
        let ops_per_sec = processed as f64 / uptime.as_secs_f64().max(1.0);

        format!(
            "# Server\r\nuptime_in_seconds:{}\r\n\
             # Clients\r\nconnected_clients:1\r\n\
             # Memory\r\nused_memory:{used_memory}\r\n\
             # Stats\r\ntotal_commands_processed:{processed}\r\n\
             instantaneous_ops_per_sec:{ops_per_sec:.0}\r\n\
             expired_keys:{}\r\nevicted_keys:0\r\n\
             keyspace_hits:{}\r\nkeyspace_misses:{}\r\n",
            uptime.as_secs(),
            self.expired_keys.load(Ordering::Relaxed),
            self.keyspace_hits.load(Ordering::Relaxed),
            self.keyspace_misses.load(Ordering::Relaxed),
        )
    }
}

/// Resolves Redis-style (possibly negative) rank bounds to inclusive indices.
fn rank_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn execute(&self, commands: Vec<Command>) -> StoreResult<Vec<StoreResult<Reply>>> {
        Ok(commands.into_iter().map(|c| self.apply_isolated(c)).collect())
    }
}
