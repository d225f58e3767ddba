//! Sync provider service: configuration of external directories.

use keyward_domain::cluster::{ClusterEvent, ClusterMessage};
use keyward_domain::error::{KeywardError, NotFoundError};
use keyward_domain::id::SyncProviderId;
use keyward_domain::outcome::Outcome;
use keyward_domain::sync::{SyncMode, SyncProviderConfig, SynchronizationResult};

use crate::ports::{ClusterNotifier, LeaseStore, SyncProviderRepository};
use crate::sync_runner::SyncRunner;

pub struct SyncProviderService<SR, LS, CN> {
    runner: SyncRunner<SR, LS>,
    notifier: CN,
}

impl<SR, LS, CN> SyncProviderService<SR, LS, CN>
where
    SR: SyncProviderRepository + Send + Sync + 'static,
    LS: LeaseStore + Send + Sync + 'static,
    CN: ClusterNotifier,
{
    /// Wrap `runner`, announcing provider changes through `notifier`.
    pub fn new(runner: SyncRunner<SR, LS>, notifier: CN) -> Self {
        Self { runner, notifier }
    }

    fn validate(&self, provider: &SyncProviderConfig) -> Result<(), KeywardError> {
        provider.validate()?;
        self.runner.registry().directory(&provider.kind)?;
        Ok(())
    }

    /// Store a new provider and arm its periodic runs.
    ///
    /// # Errors
    ///
    /// Returns [`KeywardError::Validation`] for a blank name or kind,
    /// [`KeywardError::ProviderNotFound`] when no directory implements the
    /// kind, or a storage error.
    #[tracing::instrument(skip(self, provider), fields(provider_name = %provider.name))]
    pub async fn create_provider(
        &self,
        provider: SyncProviderConfig,
    ) -> Result<SyncProviderConfig, KeywardError> {
        self.validate(&provider)?;
        let created = self.runner.providers().create(provider).await?;
        self.runner.schedule(&created);
        self.announce(created.id, false).await;
        Ok(created)
    }

    /// # Errors
    ///
    /// Returns [`KeywardError::NotFound`] for an unknown id, or a storage
    /// error.
    pub async fn get_provider(&self, id: SyncProviderId) -> Result<SyncProviderConfig, KeywardError> {
        self.runner.providers().get_by_id(id).await?.ok_or_else(|| {
            NotFoundError {
                entity: "SyncProvider",
                id: id.to_string(),
            }
            .into()
        })
    }

    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn list_providers(&self) -> Result<Vec<SyncProviderConfig>, KeywardError> {
        self.runner.providers().get_all().await
    }

    /// Replace the configuration of a provider and reschedule it.
    ///
    /// The last-sync markers are owned by the runner and kept as stored.
    ///
    /// # Errors
    ///
    /// Returns [`KeywardError::NotFound`] for an unknown id, the validation
    /// errors of [`create_provider`](Self::create_provider), or a storage
    /// error.
    #[tracing::instrument(skip(self, provider), fields(provider_id = %provider.id))]
    pub async fn update_provider(
        &self,
        mut provider: SyncProviderConfig,
    ) -> Result<SyncProviderConfig, KeywardError> {
        self.validate(&provider)?;
        let stored = self.get_provider(provider.id).await?;
        provider.last_full_sync = stored.last_full_sync;
        provider.last_incremental_sync = stored.last_incremental_sync;
        let updated = self.runner.providers().update(provider).await?;
        self.runner.schedule(&updated);
        self.announce(updated.id, false).await;
        Ok(updated)
    }

    /// Delete a provider and cancel its timers.
    ///
    /// # Errors
    ///
    /// Returns [`KeywardError::NotFound`] for an unknown id, or a storage
    /// error.
    #[tracing::instrument(skip(self))]
    pub async fn delete_provider(&self, id: SyncProviderId) -> Result<(), KeywardError> {
        self.get_provider(id).await?;
        self.runner.providers().delete(id).await?;
        self.runner.cancel(id);
        self.announce(id, true).await;
        Ok(())
    }

    /// Run `mode` for `id` now, regardless of its period.
    ///
    /// # Errors
    ///
    /// See [`SyncRunner::sync_now`].
    pub async fn sync_now(
        &self,
        id: SyncProviderId,
        mode: SyncMode,
    ) -> Result<Outcome<SynchronizationResult>, KeywardError> {
        self.runner.sync_now(id, mode).await
    }

    async fn announce(&self, provider_id: SyncProviderId, removed: bool) {
        let message = ClusterMessage::new(
            self.runner.node_id(),
            ClusterEvent::SyncProviderChanged {
                provider_id,
                removed,
            },
        );
        if let Err(err) = self.notifier.notify(message).await {
            tracing::warn!(%provider_id, error = %err, "failed to notify the cluster");
        }
    }
}
