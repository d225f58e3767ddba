//! Clock port: the source of wall-clock time for due dates and lease expiry.

use keyward_domain::time::Timestamp;

/// Provides the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}
