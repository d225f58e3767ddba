//! Wall-clock [`Clock`] used in production.

use keyward_domain::time::{self, Timestamp};

use crate::ports::Clock;

/// Reads the system UTC clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        time::now()
    }
}
