//! Translation between the tollgate command model and redis-rs types.

use redis::Value;
use tollgate_store::{Command, Reply, SetCondition, StoreError, StoreResult};

/// Deletes `KEYS[1]` only if it still holds `ARGV[1]`; runs atomically on the server.
pub(crate) const COMPARE_AND_DELETE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Sliding-window admission on the sorted set `KEYS[1]`.
///
/// ARGV: now (ms), window (ms), max, member.
pub(crate) const SLIDING_WINDOW_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
redis.call('ZREMRANGEBYSCORE', KEYS[1], 0, now - window)
local count = redis.call('ZCARD', KEYS[1])
local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')[2] or false
local admitted = 0
if count < tonumber(ARGV[3]) then
    redis.call('ZADD', KEYS[1], now, ARGV[4])
    redis.call('PEXPIRE', KEYS[1], window)
    admitted = 1
end
return {admitted, count, oldest}
"#;

/// `INCR KEYS[1]`, giving the counter a TTL of `ARGV[1]` ms when it has none.
pub(crate) const INCR_WINDOW_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

/// Removes `ARGV[1]` from the set `KEYS[1]` unless `KEYS[2]` exists.
pub(crate) const SREM_IF_MISSING_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[2]) == 0 then
    return redis.call('SREM', KEYS[1], ARGV[1])
else
    return 0
end
"#;

pub(crate) fn to_cmd(command: &Command) -> redis::Cmd {
    let mut cmd = redis::cmd(match command {
        Command::ZRangeWithScores { .. } => "ZRANGE",
        Command::CompareAndDelete { .. }
        | Command::SRemIfMissing { .. }
        | Command::SlidingWindowAdmit { .. }
        | Command::IncrWindow { .. } => "EVAL",
        other => other.name(),
    });

    match command {
        Command::Get { key }
        | Command::Exists { key }
        | Command::PTtl { key }
        | Command::Incr { key }
        | Command::HGetAll { key }
        | Command::SMembers { key }
        | Command::SCard { key }
        | Command::ZCard { key } => {
            cmd.arg(key);
        }
        Command::Set {
            key,
            value,
            ttl,
            condition,
        } => {
            cmd.arg(key).arg(value.as_slice());
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
            }
            match condition {
                SetCondition::Always => {}
                SetCondition::IfAbsent => {
                    cmd.arg("NX");
                }
                SetCondition::IfPresent => {
                    cmd.arg("XX");
                }
            }
        }
        Command::Del { keys } => {
            cmd.arg(keys);
        }
        Command::PExpire { key, ttl } => {
            cmd.arg(key).arg(ttl.as_millis().max(1) as u64);
        }
        Command::HSet { key, fields } => {
            cmd.arg(key);
            for (field, value) in fields {
                cmd.arg(field).arg(value.as_slice());
            }
        }
        Command::HGet { key, field } => {
            cmd.arg(key).arg(field);
        }
        Command::SAdd { key, members } | Command::SRem { key, members } => {
            cmd.arg(key).arg(members);
        }
        Command::ZAdd { key, score, member } => {
            cmd.arg(key).arg(*score).arg(member);
        }
        Command::ZRemRangeByScore { key, min, max } => {
            cmd.arg(key).arg(*min).arg(*max);
        }
        Command::ZRangeWithScores { key, start, stop } => {
            cmd.arg(key).arg(*start).arg(*stop).arg("WITHSCORES");
        }
        Command::Scan {
            cursor,
            pattern,
            count,
        } => {
            cmd.arg(*cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(*count);
        }
        Command::CompareAndDelete { key, expected } => {
            cmd.arg(COMPARE_AND_DELETE_SCRIPT)
                .arg(1)
                .arg(key)
                .arg(expected.as_slice());
        }
        Command::SRemIfMissing {
            key,
            member,
            witness,
        } => {
            cmd.arg(SREM_IF_MISSING_SCRIPT)
                .arg(2)
                .arg(key)
                .arg(witness)
                .arg(member);
        }
        Command::SlidingWindowAdmit {
            key,
            now_ms,
            window,
            max,
            member,
        } => {
            cmd.arg(SLIDING_WINDOW_SCRIPT)
                .arg(1)
                .arg(key)
                .arg(*now_ms)
                .arg(window.as_millis().max(1) as u64)
                .arg(*max)
                .arg(member);
        }
        Command::IncrWindow { key, window } => {
            cmd.arg(INCR_WINDOW_SCRIPT)
                .arg(1)
                .arg(key)
                .arg(window.as_millis().max(1) as u64);
        }
        Command::Ping | Command::DbSize | Command::Info => {}
    }

    cmd
}

pub(crate) fn to_reply(value: Value) -> StoreResult<Reply> {
    match value {
        Value::Nil => Ok(Reply::Nil),
        Value::Okay => Ok(Reply::Ok),
        Value::Int(n) => Ok(Reply::Int(n)),
        Value::BulkString(bytes) => Ok(Reply::Bytes(bytes)),
        Value::SimpleString(s) if s == "OK" => Ok(Reply::Ok),
        Value::SimpleString(s) => Ok(Reply::Bytes(s.into_bytes())),
        Value::Array(items) | Value::Set(items) => items
            .into_iter()
            .map(to_reply)
            .collect::<StoreResult<Vec<_>>>()
            .map(Reply::Array),
        Value::Map(pairs) => {
            let mut flat = Vec::with_capacity(pairs.len() * 2);
            for (k, v) in pairs {
                flat.push(to_reply(k)?);
                flat.push(to_reply(v)?);
            }
            Ok(Reply::Array(flat))
        }
        Value::Double(d) => Ok(Reply::Bytes(d.to_string().into_bytes())),
        Value::Boolean(b) => Ok(Reply::Int(i64::from(b))),
        Value::VerbatimString { text, .. } => Ok(Reply::Bytes(text.into_bytes())),
        Value::ServerError(err) => Err(StoreError::operation(match err.details() {
            Some(detail) => format!("{} {detail}", err.code()),
            None => err.code().to_string(),
        })),
        other => Err(StoreError::protocol(format!(
            "unsupported reply type: {other:?}"
        ))),
    }
}

/// Splits the raw replies of a pipeline into one result per command.
///
/// A server error only fails its own slot.
pub(crate) fn to_replies(values: Vec<Value>, expected: usize) -> StoreResult<Vec<StoreResult<Reply>>> {
    if values.len() != expected {
        return Err(StoreError::protocol(format!(
            "Redis returned {} replies for {expected} commands",
            values.len()
        )));
    }
    Ok(values.into_iter().map(to_reply).collect())
}

/// Classifies a redis-rs error as transient (connection) or per-command.
pub(crate) fn map_redis_error(err: redis::RedisError) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout { elapsed_ms: 0 }
    } else if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
        StoreError::connection(err.to_string())
    } else {
        StoreError::operation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn packed(cmd: &redis::Cmd) -> String {
        String::from_utf8_lossy(&cmd.get_packed_command()).into_owned()
    }

    #[test]
    fn test_set_nx_px_arguments() {
        let cmd = to_cmd(&Command::set_nx_px("lock:r", "tok", Duration::from_secs(30)));
        let wire = packed(&cmd);
        assert!(wire.contains("SET"));
        assert!(wire.contains("lock:r"));
        assert!(wire.contains("PX"));
        assert!(wire.contains("30000"));
        assert!(wire.contains("NX"));
    }

    #[test]
    fn test_compare_and_delete_uses_eval() {
        let cmd = to_cmd(&Command::compare_and_delete("lock:r", "tok"));
        let wire = packed(&cmd);
        assert!(wire.contains("EVAL"));
        assert!(wire.contains("redis.call('GET', KEYS[1])"));
        assert!(wire.contains("lock:r"));
    }

    #[test]
    fn test_set_xx_px_arguments() {
        let wire = packed(&to_cmd(&Command::set_xx_px("session:u1", "{}", Duration::from_secs(5))));
        assert!(wire.contains("XX"));
        assert!(!wire.contains("NX"));
        assert!(wire.contains("5000"));
    }

    #[test]
    fn test_srem_if_missing_passes_both_keys() {
        let wire = packed(&to_cmd(&Command::srem_if_missing(
            "tag:active_sessions",
            "u1",
            "session:u1",
        )));
        assert!(wire.contains("EVAL"));
        assert!(wire.contains("redis.call('EXISTS', KEYS[2])"));
        let set_at = wire.find("tag:active_sessions").unwrap();
        let witness_at = wire.find("session:u1").unwrap();
        assert!(set_at < witness_at);
    }

    #[test]
    fn test_rate_limit_scripts_take_one_key() {
        let wire = packed(&to_cmd(&Command::sliding_window_admit(
            "rate_limit:api:u1",
            1_000,
            Duration::from_secs(60),
            5,
            "1000-abc",
        )));
        assert!(wire.contains("EVAL"));
        assert!(wire.contains("ZREMRANGEBYSCORE"));
        assert!(wire.contains("60000"));
        assert!(wire.contains("1000-abc"));

        let wire = packed(&to_cmd(&Command::incr_window("rate_limit:login:u1", Duration::from_secs(60))));
        assert!(wire.contains("redis.call('INCR', KEYS[1])"));
        assert!(wire.contains("60000"));
    }

    #[test]
    fn test_zrange_withscores() {
        let wire = packed(&to_cmd(&Command::zrange_withscores("z", 0, 0)));
        assert!(wire.contains("ZRANGE"));
        assert!(wire.contains("WITHSCORES"));
    }

    #[test]
    fn test_reply_conversion() {
        assert_eq!(to_reply(Value::Okay).unwrap(), Reply::Ok);
        assert_eq!(
            to_reply(Value::SimpleString("PONG".into())).unwrap(),
            Reply::Bytes(b"PONG".to_vec())
        );
        assert_eq!(
            to_reply(Value::Array(vec![Value::Int(1), Value::Nil])).unwrap(),
            Reply::Array(vec![Reply::Int(1), Reply::Nil])
        );
    }

    #[test]
    fn test_pexpire_never_sends_zero() {
        let wire = packed(&to_cmd(&Command::pexpire("k", Duration::from_micros(300))));
        assert!(wire.contains("PEXPIRE"));
        assert!(wire.ends_with("$1\r\n1\r\n"), "unexpected wire: {wire:?}");
    }

    #[test]
    fn test_server_error_fails_only_its_own_slot() {
        let wrongtype = redis::parse_redis_value(
            b"-WRONGTYPE Operation against a key holding the wrong kind of value\r\n",
        )
        .unwrap();
        assert!(matches!(wrongtype, Value::ServerError(_)));

        let replies = to_replies(
            vec![Value::Okay, wrongtype, Value::BulkString(b"x".to_vec())],
            3,
        )
        .unwrap();

        assert_eq!(replies[0].as_ref().unwrap(), &Reply::Ok);
        match &replies[1] {
            Err(StoreError::Operation { message }) => assert!(message.starts_with("WRONGTYPE")),
            other => panic!("expected operation error, got {other:?}"),
        }
        assert_eq!(replies[2].as_ref().unwrap(), &Reply::Bytes(b"x".to_vec()));
    }

    #[test]
    fn test_reply_count_mismatch_is_protocol_error() {
        let err = to_replies(vec![Value::Okay], 2).unwrap_err();
        assert!(matches!(err, StoreError::Protocol { .. }));
    }
}
