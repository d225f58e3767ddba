//! Lease store port: the shared coordination store every node talks to.

use std::future::Future;
use std::sync::Arc;

use keyward_domain::error::KeywardError;
use keyward_domain::lease::Lease;
use keyward_domain::time::Timestamp;

/// Atomic, TTL-bounded key ownership shared across the cluster.
pub trait LeaseStore {
    /// Take `key` for `holder_id` until `expires_at`.
    ///
    /// Succeeds only if nobody holds the key or the current lease expired at
    /// or before `now`. Check-and-set must be atomic across nodes.
    fn try_acquire(
        &self,
        key: &str,
        holder_id: &str,
        now: Timestamp,
        expires_at: Timestamp,
    ) -> impl Future<Output = Result<Option<Lease>, KeywardError>> + Send;

    /// Give `lease` back. Returns `false` if the key is now held under a
    /// different token.
    fn release(&self, lease: &Lease) -> impl Future<Output = Result<bool, KeywardError>> + Send;

    /// The unexpired lease on `key`, if any.
    fn current(
        &self,
        key: &str,
        now: Timestamp,
    ) -> impl Future<Output = Result<Option<Lease>, KeywardError>> + Send;
}

impl<T: LeaseStore + Send + Sync> LeaseStore for Arc<T> {
    fn try_acquire(
        &self,
        key: &str,
        holder_id: &str,
        now: Timestamp,
        expires_at: Timestamp,
    ) -> impl Future<Output = Result<Option<Lease>, KeywardError>> + Send {
        (**self).try_acquire(key, holder_id, now, expires_at)
    }

    fn release(&self, lease: &Lease) -> impl Future<Output = Result<bool, KeywardError>> + Send {
        (**self).release(lease)
    }

    fn current(
        &self,
        key: &str,
        now: Timestamp,
    ) -> impl Future<Output = Result<Option<Lease>, KeywardError>> + Send {
        (**self).current(key, now)
    }
}
