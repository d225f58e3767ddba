//! Lease coordinator: at most one node runs a given unit of work at a time.
//!
//! Every node schedules the same logical tasks locally. When a timer fires,
//! the work is wrapped in [`LeaseCoordinator::execute_if_not_executed`] under
//! a shared key; only the node that wins the lease runs the body, the others
//! report `executed = false`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use keyward_domain::error::KeywardError;
use keyward_domain::lease::ExecutionResult;
use keyward_domain::time::add_duration;

use crate::ports::{Clock, LeaseStore};

/// Runs work under a cluster-wide, TTL-bounded lease.
pub struct LeaseCoordinator<LS> {
    store: LS,
    node_id: String,
    clock: Arc<dyn Clock>,
}

impl<LS: LeaseStore> LeaseCoordinator<LS> {
    /// Create a coordinator acting on behalf of `node_id`.
    pub fn new(store: LS, node_id: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            node_id: node_id.into(),
            clock,
        }
    }

    /// Holder id written into every lease this coordinator takes.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Run `body` unless another execution of `key` currently holds the lease.
    ///
    /// The lease expires after `ttl` whatever happens to this node. It is
    /// released once `body` finishes, successfully or not, unless `ttl` has
    /// already elapsed: by then another node may legitimately hold the key.
    ///
    /// A lease still held by this same node counts as held; calls are not
    /// reentrant.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lease store cannot be reached. The body
    /// is not run in that case.
    #[tracing::instrument(skip(self, body), fields(node_id = %self.node_id))]
    pub async fn execute_if_not_executed<T, F>(
        &self,
        key: &str,
        ttl: Duration,
        body: F,
    ) -> Result<ExecutionResult<T>, KeywardError>
    where
        F: Future<Output = T>,
    {
        let now = self.clock.now();
        let expires_at = add_duration(now, ttl);
        let Some(lease) = self
            .store
            .try_acquire(key, &self.node_id, now, expires_at)
            .await?
        else {
            tracing::debug!("skipped, another execution holds the lease");
            return Ok(ExecutionResult::skipped());
        };

        let result = body.await;

        if lease.is_expired(self.clock.now()) {
            tracing::warn!(?ttl, "execution outlived its lease, not releasing");
        } else {
            match self.store.release(&lease).await {
                Ok(true) => {}
                Ok(false) => tracing::warn!("lease was taken over before release"),
                Err(err) => tracing::warn!(error = %err, "failed to release lease"),
            }
        }
        tracing::debug!("executed");
        Ok(ExecutionResult::executed(result))
    }
}
