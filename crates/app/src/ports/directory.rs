//! Directory port: external user directories imported by the sync runner.

use futures::future::BoxFuture;

use keyward_domain::error::KeywardError;
use keyward_domain::sync::{SyncProviderConfig, SynchronizationResult};
use keyward_domain::time::Timestamp;

/// An external user directory, registered under the id that
/// [`SyncProviderConfig::kind`] refers to.
///
/// Object safe so implementations can be registered by id at startup.
pub trait DirectoryProvider: Send + Sync {
    /// Registry id of this implementation.
    fn id(&self) -> &str;

    /// Import every entry of the directory.
    fn sync_all<'a>(
        &'a self,
        provider: &'a SyncProviderConfig,
    ) -> BoxFuture<'a, Result<SynchronizationResult, KeywardError>>;

    /// Import entries changed after `since`.
    fn sync_since<'a>(
        &'a self,
        provider: &'a SyncProviderConfig,
        since: Timestamp,
    ) -> BoxFuture<'a, Result<SynchronizationResult, KeywardError>>;
}
