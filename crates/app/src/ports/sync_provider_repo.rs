//! Sync provider repository port: configuration of external directories.

use std::future::Future;
use std::sync::Arc;

use keyward_domain::error::KeywardError;
use keyward_domain::id::SyncProviderId;
use keyward_domain::sync::{SyncMode, SyncProviderConfig};

/// Repository for [`SyncProviderConfig`]s.
pub trait SyncProviderRepository {
    fn create(
        &self,
        provider: SyncProviderConfig,
    ) -> impl Future<Output = Result<SyncProviderConfig, KeywardError>> + Send;

    fn get_by_id(
        &self,
        id: SyncProviderId,
    ) -> impl Future<Output = Result<Option<SyncProviderConfig>, KeywardError>> + Send;

    fn get_all(
        &self,
    ) -> impl Future<Output = Result<Vec<SyncProviderConfig>, KeywardError>> + Send;

    fn update(
        &self,
        provider: SyncProviderConfig,
    ) -> impl Future<Output = Result<SyncProviderConfig, KeywardError>> + Send;

    fn delete(&self, id: SyncProviderId)
    -> impl Future<Output = Result<(), KeywardError>> + Send;

    /// Record the completion time (epoch seconds) of a `mode` run without
    /// touching the rest of the configuration.
    fn update_last_sync(
        &self,
        id: SyncProviderId,
        mode: SyncMode,
        at: i64,
    ) -> impl Future<Output = Result<(), KeywardError>> + Send;
}

impl<T: SyncProviderRepository + Send + Sync> SyncProviderRepository for Arc<T> {
    fn create(
        &self,
        provider: SyncProviderConfig,
    ) -> impl Future<Output = Result<SyncProviderConfig, KeywardError>> + Send {
        (**self).create(provider)
    }

    fn get_by_id(
        &self,
        id: SyncProviderId,
    ) -> impl Future<Output = Result<Option<SyncProviderConfig>, KeywardError>> + Send {
        (**self).get_by_id(id)
    }

    fn get_all(
        &self,
    ) -> impl Future<Output = Result<Vec<SyncProviderConfig>, KeywardError>> + Send {
        (**self).get_all()
    }

    fn update(
        &self,
        provider: SyncProviderConfig,
    ) -> impl Future<Output = Result<SyncProviderConfig, KeywardError>> + Send {
        (**self).update(provider)
    }

    fn delete(
        &self,
        id: SyncProviderId,
    ) -> impl Future<Output = Result<(), KeywardError>> + Send {
        (**self).delete(id)
    }

    fn update_last_sync(
        &self,
        id: SyncProviderId,
        mode: SyncMode,
        at: i64,
    ) -> impl Future<Output = Result<(), KeywardError>> + Send {
        (**self).update_last_sync(id, mode, at)
    }
}
