//! Column encodings shared by the repositories.
//!
//! Timestamps are stored as epoch milliseconds so that due dates and lease
//! expiry compare with plain integer operators. Durations are stored in
//! whole seconds.

use std::time::Duration;

use chrono::{DateTime, Utc};

use keyward_domain::time::Timestamp;

#[derive(Debug, thiserror::Error)]
#[error("timestamp {0} is out of range")]
pub(crate) struct OutOfRange(i64);

pub(crate) fn to_millis(at: Timestamp) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> Result<Timestamp, sqlx::Error> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| crate::error::decode_err(OutOfRange(millis)))
}

pub(crate) fn to_secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

pub(crate) fn from_secs(secs: i64) -> Duration {
    Duration::from_secs(u64::try_from(secs).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_keep_millisecond_precision() {
        let at = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(from_millis(to_millis(at)).unwrap(), at);
    }

    #[test]
    fn should_clamp_negative_durations_to_zero() {
        assert_eq!(from_secs(-5), Duration::ZERO);
        assert_eq!(to_secs(Duration::from_secs(90)), 90);
    }
}
