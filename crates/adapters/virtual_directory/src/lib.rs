//! # keyward-adapter-virtual-directory
//!
//! In-memory external user directory, registered under the kind `virtual`.
//!
//! Entries and removals are recorded with the time they happened, which is
//! what incremental imports filter on. Imported users are linked to the
//! provider that created them; a user linked elsewhere is never touched.
//!
//! ## Dependency rule
//!
//! Depends on `keyward-app` (port traits) and `keyward-domain` only.

mod entry;

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;

use keyward_app::ports::{Clock, DirectoryProvider, UserStore};
use keyward_domain::error::KeywardError;
use keyward_domain::sync::{SyncProviderConfig, SynchronizationResult};
use keyward_domain::time::Timestamp;

pub use entry::DirectoryEntry;
use entry::Stamped;

/// Registry id of [`VirtualDirectory`].
pub const VIRTUAL_DIRECTORY_KIND: &str = "virtual";

#[derive(Default)]
struct Contents {
    entries: BTreeMap<String, Stamped<DirectoryEntry>>,
    removed: BTreeMap<String, Timestamp>,
}

/// What a single import decided for one entry.
enum Imported {
    Added,
    Updated,
    Unchanged,
    Conflict,
}

/// Simulated directory importing into `US`.
pub struct VirtualDirectory<US> {
    users: US,
    clock: Arc<dyn Clock>,
    contents: RwLock<Contents>,
}

impl<US> VirtualDirectory<US>
where
    US: UserStore + Send + Sync,
{
    /// An empty directory importing into `users`.
    pub fn new(users: US, clock: Arc<dyn Clock>) -> Self {
        Self {
            users,
            clock,
            contents: RwLock::new(Contents::default()),
        }
    }

    /// Add or replace an entry.
    pub fn put(&self, entry: DirectoryEntry) {
        let changed_at = self.clock.now();
        let mut contents = self.contents.write().unwrap_or_else(PoisonError::into_inner);
        contents.removed.remove(&entry.username);
        contents.entries.insert(
            entry.username.clone(),
            Stamped {
                value: entry,
                changed_at,
            },
        );
    }

    /// Remove an entry. Returns `false` if it did not exist.
    pub fn remove(&self, username: &str) -> bool {
        let changed_at = self.clock.now();
        let mut contents = self.contents.write().unwrap_or_else(PoisonError::into_inner);
        if contents.entries.remove(username).is_none() {
            return false;
        }
        contents.removed.insert(username.to_string(), changed_at);
        true
    }

    /// Entries and removals changed after `since`, or all of them.
    fn snapshot(&self, since: Option<Timestamp>) -> (Vec<DirectoryEntry>, Vec<String>) {
        let contents = self.contents.read().unwrap_or_else(PoisonError::into_inner);
        let is_new = |at: &Timestamp| since.is_none_or(|since| *at > since);
        let entries = contents
            .entries
            .values()
            .filter(|stamped| is_new(&stamped.changed_at))
            .map(|stamped| stamped.value.clone())
            .collect();
        let removed = contents
            .removed
            .iter()
            .filter(|(_, at)| is_new(at))
            .map(|(username, _)| username.clone())
            .collect();
        (entries, removed)
    }

    async fn import(
        &self,
        provider: &SyncProviderConfig,
        entry: &DirectoryEntry,
    ) -> Result<Imported, KeywardError> {
        let link = provider.id.to_string();
        match self.users.get_by_username(&entry.username).await? {
            None => {
                self.users
                    .create(entry.to_user(provider.id, self.clock.now()))
                    .await?;
                Ok(Imported::Added)
            }
            Some(user) if user.federation_link.as_deref() != Some(link.as_str()) => {
                tracing::warn!(
                    username = %entry.username,
                    provider_id = %provider.id,
                    "user exists and is not linked to this provider, skipping"
                );
                Ok(Imported::Conflict)
            }
            Some(mut user) => {
                if entry.apply_to(&mut user) {
                    self.users.update(user).await?;
                    Ok(Imported::Updated)
                } else {
                    Ok(Imported::Unchanged)
                }
            }
        }
    }

    async fn unlink(
        &self,
        provider: &SyncProviderConfig,
        username: &str,
    ) -> Result<bool, KeywardError> {
        let link = provider.id.to_string();
        match self.users.get_by_username(username).await? {
            Some(user) if user.federation_link.as_deref() == Some(link.as_str()) => {
                self.users.delete(&user.id).await
            }
            _ => Ok(false),
        }
    }

    async fn synchronize(
        &self,
        provider: &SyncProviderConfig,
        since: Option<Timestamp>,
    ) -> Result<SynchronizationResult, KeywardError> {
        if !provider.import_enabled {
            return Ok(SynchronizationResult::ignored());
        }
        let (entries, removed) = self.snapshot(since);
        let mut result = SynchronizationResult::default();

        for entry in &entries {
            match self.import(provider, entry).await {
                Ok(Imported::Added) => result.added += 1,
                Ok(Imported::Updated) => result.updated += 1,
                Ok(Imported::Unchanged) => {}
                Ok(Imported::Conflict) => result.failed += 1,
                Err(err) => {
                    tracing::warn!(username = %entry.username, error = %err, "failed to import user");
                    result.failed += 1;
                }
            }
        }
        for username in &removed {
            match self.unlink(provider, username).await {
                Ok(true) => result.removed += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(%username, error = %err, "failed to remove user");
                    result.failed += 1;
                }
            }
        }
        Ok(result)
    }
}

impl<US> DirectoryProvider for VirtualDirectory<US>
where
    US: UserStore + Send + Sync,
{
    fn id(&self) -> &str {
        VIRTUAL_DIRECTORY_KIND
    }

    fn sync_all<'a>(
        &'a self,
        provider: &'a SyncProviderConfig,
    ) -> BoxFuture<'a, Result<SynchronizationResult, KeywardError>> {
        Box::pin(self.synchronize(provider, None))
    }

    fn sync_since<'a>(
        &'a self,
        provider: &'a SyncProviderConfig,
        since: Timestamp,
    ) -> BoxFuture<'a, Result<SynchronizationResult, KeywardError>> {
        Box::pin(self.synchronize(provider, Some(since)))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::future::Future;
    use std::sync::Mutex;
    use std::time::Duration;

    use keyward_app::clock::SystemClock;
    use keyward_domain::sync::SyncMode;
    use keyward_domain::time::{add_duration, from_epoch_secs, now};
    use keyward_domain::user::User;

    use super::*;

    #[derive(Default)]
    struct Users(Mutex<HashMap<String, User>>);

    impl Users {
        fn by_name(&self, username: &str) -> Option<User> {
            self.0
                .lock()
                .unwrap()
                .values()
                .find(|user| user.username == username)
                .cloned()
        }
    }

    impl UserStore for Users {
        fn create(&self, user: User) -> impl Future<Output = Result<User, KeywardError>> + Send {
            self.0.lock().unwrap().insert(user.id.clone(), user.clone());
            async { Ok(user) }
        }

        fn get_by_id(
            &self,
            id: &str,
        ) -> impl Future<Output = Result<Option<User>, KeywardError>> + Send {
            let user = self.0.lock().unwrap().get(id).cloned();
            async { Ok(user) }
        }

        fn get_by_username(
            &self,
            username: &str,
        ) -> impl Future<Output = Result<Option<User>, KeywardError>> + Send {
            let user = self.by_name(username);
            async { Ok(user) }
        }

        fn update(&self, user: User) -> impl Future<Output = Result<User, KeywardError>> + Send {
            self.0.lock().unwrap().insert(user.id.clone(), user.clone());
            async { Ok(user) }
        }

        fn delete(&self, id: &str) -> impl Future<Output = Result<bool, KeywardError>> + Send {
            let removed = self.0.lock().unwrap().remove(id).is_some();
            async move { Ok(removed) }
        }

        fn list_page(
            &self,
            _after: Option<&str>,
            _limit: usize,
        ) -> impl Future<Output = Result<Vec<User>, KeywardError>> + Send {
            async { Ok(Vec::new()) }
        }
    }

    fn directory() -> VirtualDirectory<Arc<Users>> {
        VirtualDirectory::new(Arc::new(Users::default()), Arc::new(SystemClock))
    }

    fn provider() -> SyncProviderConfig {
        SyncProviderConfig::new("corporate", VIRTUAL_DIRECTORY_KIND)
            .with_period(SyncMode::Full, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn should_import_new_entries_linked_to_provider() {
        let directory = directory();
        let provider = provider();
        directory.put(
            DirectoryEntry::new("alice")
                .with_group("/sales")
                .with_attribute("department", "sales"),
        );

        let result = directory.sync_all(&provider).await.unwrap();

        assert_eq!(result.added, 1);
        let alice = directory.users.by_name("alice").unwrap();
        assert_eq!(alice.federation_link, Some(provider.id.to_string()));
        assert!(alice.is_member_of("sales"));
        assert_eq!(alice.attribute("department"), Some(&["sales".to_string()][..]));
    }

    #[tokio::test]
    async fn should_count_only_changed_users_as_updated() {
        let directory = directory();
        let provider = provider();
        directory.put(DirectoryEntry::new("alice"));
        directory.put(DirectoryEntry::new("bob"));
        directory.sync_all(&provider).await.unwrap();

        directory.put(DirectoryEntry::new("bob").with_group("/staff"));
        let result = directory.sync_all(&provider).await.unwrap();

        assert_eq!(result.added, 0);
        assert_eq!(result.updated, 1);
    }

    #[tokio::test]
    async fn should_not_touch_users_linked_elsewhere() {
        let directory = directory();
        let provider = provider();
        directory
            .users
            .create(User::new("alice", now()))
            .await
            .unwrap();
        directory.put(DirectoryEntry::new("alice").with_group("/sales"));

        let result = directory.sync_all(&provider).await.unwrap();

        assert_eq!(result.failed, 1);
        assert!(!directory.users.by_name("alice").unwrap().is_member_of("/sales"));
    }

    #[tokio::test]
    async fn should_remove_users_deleted_from_directory() {
        let directory = directory();
        let provider = provider();
        directory.put(DirectoryEntry::new("alice"));
        directory.sync_all(&provider).await.unwrap();

        assert!(directory.remove("alice"));
        let result = directory.sync_all(&provider).await.unwrap();

        assert_eq!(result.removed, 1);
        assert!(directory.users.by_name("alice").is_none());
    }

    #[tokio::test]
    async fn should_import_only_changes_since_given_time() {
        let directory = directory();
        let provider = provider();
        directory.put(DirectoryEntry::new("alice"));

        let later = add_duration(now(), Duration::from_secs(60));
        let nothing = directory.sync_since(&provider, later).await.unwrap();
        let changes = directory
            .sync_since(&provider, from_epoch_secs(0))
            .await
            .unwrap();

        assert_eq!(nothing, SynchronizationResult::default());
        assert_eq!(changes.added, 1);
    }

    #[tokio::test]
    async fn should_ignore_provider_with_import_disabled() {
        let directory = directory();
        let mut provider = provider();
        provider.import_enabled = false;
        directory.put(DirectoryEntry::new("alice"));

        let result = directory.sync_all(&provider).await.unwrap();

        assert!(result.ignored);
        assert!(directory.users.by_name("alice").is_none());
    }
}
