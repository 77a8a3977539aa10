//! Persisted key layout.
//!
//! | Key | Type | Owner |
//! |---|---|---|
//! | `session:{id}` | string (JSON) | sessions |
//! | `session:{id}:activity` | hash | sessions |
//! | `tag:active_sessions` | set | sessions |
//! | `blacklist:{fingerprint}` | string (JSON) | revocation |
//! | `tag:revoked_tokens` | set | revocation |
//! | `rate_limit:{type}:{identifier}` | zset or counter | rate limiter |
//! | `lock:{resource}` | string | locks |
//! | `otp:{email}:{type}` | string (JSON) | OTP store |

pub const ACTIVE_SESSIONS: &str = "tag:active_sessions";
pub const REVOKED_TOKENS: &str = "tag:revoked_tokens";

pub const BLACKLIST_PATTERN: &str = "blacklist:*";
pub const RATE_LIMIT_PATTERN: &str = "rate_limit:*";
pub const OTP_PATTERN: &str = "otp:*";

pub fn session(subject_id: &str) -> String {
    format!("session:{subject_id}")
}

pub fn session_activity(subject_id: &str) -> String {
    format!("session:{subject_id}:activity")
}

pub fn blacklist(fingerprint: &str) -> String {
    format!("blacklist:{fingerprint}")
}

pub fn rate_limit(kind: &str, identifier: &str) -> String {
    format!("rate_limit:{kind}:{identifier}")
}

pub fn lock(resource: &str) -> String {
    format!("lock:{resource}")
}

/// Email addresses are case-insensitive, so they are normalized.
pub fn otp(email: &str, purpose: &str) -> String {
    format!("otp:{}:{purpose}", email.trim().to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(session("u1"), "session:u1");
        assert_eq!(session_activity("u1"), "session:u1:activity");
        assert_eq!(rate_limit("login", "ip:1.2.3.4"), "rate_limit:login:ip:1.2.3.4");
        assert_eq!(otp(" Alice@Example.COM ", "login"), "otp:alice@example.com:login");
    }

    #[test]
    fn test_index_keys_outside_scan_patterns() {
        assert!(!REVOKED_TOKENS.starts_with("blacklist:"));
        assert!(!ACTIVE_SESSIONS.starts_with("session:"));
    }
}
