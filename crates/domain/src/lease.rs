//! Leases in the shared coordination store.

use serde::{Deserialize, Serialize};

use crate::id::LeaseToken;
use crate::time::Timestamp;

/// Exclusive, time-bounded right of one node to run the work behind `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub key: String,
    pub holder_id: String,
    pub token: LeaseToken,
    pub expires_at: Timestamp,
}

impl Lease {
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }
}

/// What happened when a node asked to run lease-guarded work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult<T> {
    /// `false` when another holder owned the lease and the body was skipped.
    pub executed: bool,
    pub result: Option<T>,
}

impl<T> ExecutionResult<T> {
    #[must_use]
    pub fn executed(result: T) -> Self {
        Self {
            executed: true,
            result: Some(result),
        }
    }

    #[must_use]
    pub fn skipped() -> Self {
        Self {
            executed: false,
            result: None,
        }
    }

    #[must_use]
    pub fn into_result(self) -> Option<T> {
        self.result
    }
}
