//! In-memory [`LeaseStore`] for single-process deployments and tests.
//!
//! ## Limitations
//!
//! - **Single-process only**: leases are not visible to other processes
//! - **No persistence**: all leases are lost when the process exits

use std::collections::HashMap;
use std::future::Future;
use std::sync::{PoisonError, RwLock};

use keyward_domain::error::KeywardError;
use keyward_domain::id::LeaseToken;
use keyward_domain::lease::Lease;
use keyward_domain::time::Timestamp;

use crate::ports::LeaseStore;

/// Lease table guarded by a [`RwLock`].
#[derive(Debug, Default)]
pub struct InMemoryLeaseStore {
    leases: RwLock<HashMap<String, Lease>>,
}

fn poison_err<T>(_: PoisonError<T>) -> KeywardError {
    KeywardError::Storage(Box::new(std::io::Error::other("lease table lock poisoned")))
}

impl InMemoryLeaseStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(
        &self,
        key: &str,
        holder_id: &str,
        now: Timestamp,
        expires_at: Timestamp,
    ) -> Result<Option<Lease>, KeywardError> {
        let mut leases = self.leases.write().map_err(poison_err)?;
        if leases.get(key).is_some_and(|lease| !lease.is_expired(now)) {
            return Ok(None);
        }
        let lease = Lease {
            key: key.to_string(),
            holder_id: holder_id.to_string(),
            token: LeaseToken::new(),
            expires_at,
        };
        leases.insert(key.to_string(), lease.clone());
        Ok(Some(lease))
    }

    fn give_back(&self, lease: &Lease) -> Result<bool, KeywardError> {
        let mut leases = self.leases.write().map_err(poison_err)?;
        match leases.get(&lease.key) {
            Some(current) if current.token == lease.token => {
                leases.remove(&lease.key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn lookup(&self, key: &str, now: Timestamp) -> Result<Option<Lease>, KeywardError> {
        let leases = self.leases.read().map_err(poison_err)?;
        Ok(leases
            .get(key)
            .filter(|lease| !lease.is_expired(now))
            .cloned())
    }
}

impl LeaseStore for InMemoryLeaseStore {
    fn try_acquire(
        &self,
        key: &str,
        holder_id: &str,
        now: Timestamp,
        expires_at: Timestamp,
    ) -> impl Future<Output = Result<Option<Lease>, KeywardError>> + Send {
        let result = self.acquire(key, holder_id, now, expires_at);
        async { result }
    }

    fn release(&self, lease: &Lease) -> impl Future<Output = Result<bool, KeywardError>> + Send {
        let result = self.give_back(lease);
        async { result }
    }

    fn current(
        &self,
        key: &str,
        now: Timestamp,
    ) -> impl Future<Output = Result<Option<Lease>, KeywardError>> + Send {
        let result = self.lookup(key, now);
        async { result }
    }
}
