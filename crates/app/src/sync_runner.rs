//! Periodic import from external directories.
//!
//! Every node arms one timer per provider and mode. When a timer fires the
//! run is skipped if the last sync of that mode is younger than its period;
//! otherwise the import runs under the provider's lease, so one node does
//! the work while the others observe an ignored run.

use std::sync::Arc;
use std::time::Duration;

use keyward_domain::cluster::ClusterEvent;
use keyward_domain::error::KeywardError;
use keyward_domain::id::SyncProviderId;
use keyward_domain::outcome::Outcome;
use keyward_domain::sync::{SyncMode, SyncProviderConfig, SynchronizationResult};
use keyward_domain::time::{from_epoch_secs, remaining};

use crate::lease_coordinator::LeaseCoordinator;
use crate::ports::{DirectoryProvider, LeaseStore, SyncProviderRepository};
use crate::providers::ProviderRegistry;
use crate::runtime::NodeRuntime;
use crate::scheduler::{TaskControl, task_fn};

/// Lower bound of the lease TTL of a sync run.
pub const MIN_SYNC_LEASE_TTL: Duration = Duration::from_secs(30);

/// Timer name of the periodic `mode` run of `provider_id`.
#[must_use]
pub fn sync_task_name(provider_id: SyncProviderId, mode: SyncMode) -> String {
    format!("sync-{provider_id}-{mode}")
}

/// Lease key shared by the full and incremental runs of a provider.
#[must_use]
pub fn sync_lease_key(provider_id: SyncProviderId) -> String {
    format!("{provider_id}::sync")
}

struct Inner<SR, LS> {
    providers: SR,
    registry: Arc<ProviderRegistry>,
    leases: LeaseCoordinator<LS>,
    runtime: NodeRuntime,
    enabled: bool,
}

/// Schedules and runs directory imports on one node. Cheap to clone.
pub struct SyncRunner<SR, LS> {
    inner: Arc<Inner<SR, LS>>,
}

impl<SR, LS> Clone for SyncRunner<SR, LS> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<SR, LS> SyncRunner<SR, LS>
where
    SR: SyncProviderRepository + Send + Sync + 'static,
    LS: LeaseStore + Send + Sync + 'static,
{
    /// With `enabled` unset nothing is ever scheduled; manual runs still work.
    pub fn new(
        providers: SR,
        registry: Arc<ProviderRegistry>,
        leases: LeaseCoordinator<LS>,
        runtime: NodeRuntime,
        enabled: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                providers,
                registry,
                leases,
                runtime,
                enabled,
            }),
        }
    }

    /// Stored sync provider configurations.
    #[must_use]
    pub fn providers(&self) -> &SR {
        &self.inner.providers
    }

    /// Directory implementations providers are resolved against.
    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.inner.registry
    }

    /// Id under which this node takes sync leases.
    #[must_use]
    pub fn node_id(&self) -> &str {
        self.inner.leases.node_id()
    }

    /// Schedule every stored provider. Returns the number of armed timers.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the providers cannot be listed.
    pub async fn schedule_all(&self) -> Result<usize, KeywardError> {
        if !self.inner.enabled {
            tracing::info!("periodic directory sync disabled");
            return Ok(0);
        }
        let mut armed = 0;
        for provider in self.inner.providers.get_all().await? {
            armed += self.schedule(&provider);
        }
        tracing::info!(armed, "directory sync scheduled");
        Ok(armed)
    }

    /// Arm the timers `provider` qualifies for and cancel the others.
    /// Returns the number of armed timers.
    pub fn schedule(&self, provider: &SyncProviderConfig) -> usize {
        let mut armed = 0;
        for mode in SyncMode::ALL {
            if self.inner.enabled && provider.is_schedulable(mode) {
                self.arm(provider, mode);
                armed += 1;
            } else if self
                .inner
                .runtime
                .scheduler
                .cancel(&sync_task_name(provider.id, mode))
                .is_some()
            {
                tracing::debug!(provider_id = %provider.id, %mode, "sync no longer schedulable");
            }
        }
        armed
    }

    /// Cancel both timers of `provider_id`.
    pub fn cancel(&self, provider_id: SyncProviderId) {
        for mode in SyncMode::ALL {
            self.inner
                .runtime
                .scheduler
                .cancel(&sync_task_name(provider_id, mode));
        }
    }

    /// Re-read `provider_id` and reschedule it, or cancel it if it is gone.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the provider cannot be read.
    pub async fn refresh(&self, provider_id: SyncProviderId) -> Result<(), KeywardError> {
        match self.inner.providers.get_by_id(provider_id).await? {
            Some(provider) => {
                self.schedule(&provider);
            }
            None => self.cancel(provider_id),
        }
        Ok(())
    }

    fn arm(&self, provider: &SyncProviderConfig, mode: SyncMode) {
        let delay = self.next_wait(provider, mode);
        let period = provider.period(mode);
        let weak = Arc::downgrade(&self.inner);
        let provider_id = provider.id;
        self.inner.runtime.scheduler.schedule(
            sync_task_name(provider_id, mode),
            delay,
            Some(period),
            task_fn(move || {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(inner) => Self { inner }.fire(provider_id, mode).await,
                        None => TaskControl::Cancel,
                    }
                }
            }),
        );
        tracing::debug!(%provider_id, %mode, ?delay, ?period, "sync armed");
    }

    /// Wait until the period guard lets the next run through.
    fn next_wait(&self, provider: &SyncProviderConfig, mode: SyncMode) -> Duration {
        match provider.next_sync_due(mode) {
            Some(due) => remaining(self.inner.runtime.clock.now(), from_epoch_secs(due)),
            None => provider.period(mode),
        }
    }

    async fn fire(&self, provider_id: SyncProviderId, mode: SyncMode) -> TaskControl {
        match self.run(provider_id, mode).await {
            Ok(Outcome::NotFound) => return TaskControl::Cancel,
            Ok(_) => {}
            Err(err @ KeywardError::ProviderNotFound(_)) => {
                tracing::error!(%provider_id, %mode, error = %err, "sync misconfigured, cancelling");
                return TaskControl::Cancel;
            }
            Err(err) => tracing::warn!(%provider_id, %mode, error = %err, "periodic sync failed"),
        }

        // a failed or skipped run leaves the marker behind: wait a full period
        match self.inner.providers.get_by_id(provider_id).await {
            Ok(Some(provider)) => {
                let wait = self.next_wait(&provider, mode);
                if wait.is_zero() {
                    TaskControl::Continue
                } else {
                    TaskControl::RetryAfter(wait)
                }
            }
            _ => TaskControl::Continue,
        }
    }

    /// Periodic run of `mode` for `provider_id`.
    ///
    /// Returns [`Outcome::NotFound`] after cancelling the timers of a
    /// provider that no longer exists, and [`Outcome::Ignored`] when the
    /// period has not elapsed or another node holds the lease.
    ///
    /// # Errors
    ///
    /// Returns [`KeywardError::ProviderNotFound`] when no directory is
    /// registered for the provider kind, the directory's error, or a
    /// storage error.
    #[tracing::instrument(skip(self))]
    pub async fn run(
        &self,
        provider_id: SyncProviderId,
        mode: SyncMode,
    ) -> Result<Outcome<SynchronizationResult>, KeywardError> {
        let Some(provider) = self.inner.providers.get_by_id(provider_id).await? else {
            tracing::debug!("sync provider no longer exists, cancelling its timers");
            self.cancel(provider_id);
            return Ok(Outcome::NotFound);
        };
        if !self.is_due(&provider, mode) {
            tracing::debug!("ignored, last sync is younger than the period");
            return Ok(Outcome::Ignored);
        }
        self.sync_under_lease(&provider, mode, true).await
    }

    /// Manual run of `mode` for `provider_id`, regardless of the period.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run).
    #[tracing::instrument(skip(self))]
    pub async fn sync_now(
        &self,
        provider_id: SyncProviderId,
        mode: SyncMode,
    ) -> Result<Outcome<SynchronizationResult>, KeywardError> {
        let Some(provider) = self.inner.providers.get_by_id(provider_id).await? else {
            return Ok(Outcome::NotFound);
        };
        if !provider.enabled {
            return Ok(Outcome::InvalidConfig(format!(
                "sync provider {} is disabled",
                provider.name
            )));
        }
        self.sync_under_lease(&provider, mode, false).await
    }

    fn is_due(&self, provider: &SyncProviderConfig, mode: SyncMode) -> bool {
        provider.is_sync_due(mode, self.inner.runtime.clock.now().timestamp())
    }

    async fn sync_under_lease(
        &self,
        provider: &SyncProviderConfig,
        mode: SyncMode,
        guarded: bool,
    ) -> Result<Outcome<SynchronizationResult>, KeywardError> {
        let directory = self.inner.registry.directory(&provider.kind)?;
        let ttl = provider.period(mode).max(MIN_SYNC_LEASE_TTL);
        let run = self
            .inner
            .leases
            .execute_if_not_executed(
                &sync_lease_key(provider.id),
                ttl,
                self.sync(provider.id, mode, directory.as_ref(), guarded),
            )
            .await?;
        match run.into_result() {
            Some(result) => result,
            None => {
                tracing::debug!("sync already in progress on another node");
                Ok(Outcome::Ignored)
            }
        }
    }

    async fn sync(
        &self,
        provider_id: SyncProviderId,
        mode: SyncMode,
        directory: &dyn DirectoryProvider,
        guarded: bool,
    ) -> Result<Outcome<SynchronizationResult>, KeywardError> {
        // another node may have finished a run between the guard and the lease
        let Some(provider) = self.inner.providers.get_by_id(provider_id).await? else {
            return Ok(Outcome::NotFound);
        };
        if guarded && !self.is_due(&provider, mode) {
            return Ok(Outcome::Ignored);
        }

        let started = self.inner.runtime.clock.now();
        let result = match mode {
            SyncMode::Full => directory.sync_all(&provider).await?,
            SyncMode::Incremental => {
                let since = from_epoch_secs(provider.last_sync(mode));
                directory.sync_since(&provider, since).await?
            }
        };
        if !result.ignored {
            self.inner
                .providers
                .update_last_sync(provider_id, mode, started.timestamp())
                .await?;
        }
        tracing::info!(%result, "directory sync finished");
        Ok(Outcome::Executed(result))
    }

    /// React to a provider change made on another node.
    pub async fn on_cluster_event(&self, event: ClusterEvent) {
        match event {
            ClusterEvent::SyncProviderChanged {
                provider_id,
                removed: true,
            } => self.cancel(provider_id),
            ClusterEvent::SyncProviderChanged {
                provider_id,
                removed: false,
            } => {
                if let Err(err) = self.refresh(provider_id).await {
                    tracing::warn!(%provider_id, error = %err, "failed to refresh sync provider");
                }
            }
            ClusterEvent::AutomationChanged { .. } => {}
        }
    }
}
