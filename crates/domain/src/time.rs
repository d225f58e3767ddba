//! Time and timestamp helpers.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// UTC timestamp used for trigger times, due dates and lease expiry.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Timestamp of an epoch-seconds marker; out of range values map to the epoch.
#[must_use]
pub fn from_epoch_secs(secs: i64) -> Timestamp {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default()
}

/// Shift a timestamp forward, saturating instead of overflowing.
#[must_use]
pub fn add_duration(at: Timestamp, delay: Duration) -> Timestamp {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Time left until `due`, or zero if it already passed.
#[must_use]
pub fn remaining(now: Timestamp, due: Timestamp) -> Duration {
    (due - now).to_std().unwrap_or(Duration::ZERO)
}
