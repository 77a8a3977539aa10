//! Wall-clock helpers shared by the managers.

use std::time::Duration;

use time::OffsetDateTime;

pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Milliseconds since the Unix epoch.
pub fn unix_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

pub fn from_unix_millis(millis: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// Time left until `deadline`, or `None` when it has already passed.
pub fn until(deadline: OffsetDateTime, now: OffsetDateTime) -> Option<Duration> {
    let left = deadline - now;
    if left.is_positive() {
        Duration::try_from(left).ok()
    } else {
        None
    }
}

pub fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_until() {
        let now = datetime!(2024-01-01 00:00:00 UTC);
        assert_eq!(
            until(datetime!(2024-01-01 00:01:00 UTC), now),
            Some(Duration::from_secs(60))
        );
        assert_eq!(until(now, now), None);
        assert_eq!(until(datetime!(2023-12-31 23:59:00 UTC), now), None);
    }

    #[test]
    fn test_unix_millis_round_trip() {
        let at = datetime!(2024-05-06 07:08:09.123 UTC);
        assert_eq!(from_unix_millis(unix_millis(at)), at);
    }
}
