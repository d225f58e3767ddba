//! In-memory ports and a pausable clock shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Mutex;

use futures::future::BoxFuture;
use keyward_domain::automation::AutomationDefinition;
use keyward_domain::error::{ConflictError, KeywardError, NotFoundError};
use keyward_domain::id::{AutomationId, SyncProviderId};
use keyward_domain::schedule::ScheduledStep;
use keyward_domain::sync::{SyncMode, SyncProviderConfig, SynchronizationResult};
use keyward_domain::time::{self, Timestamp, add_duration};
use keyward_domain::user::User;

use crate::ports::{
    AutomationRepository, Clock, DirectoryProvider, ScheduledStepStore, SyncProviderRepository,
    UserStore,
};

// ── Clock ──────────────────────────────────────────────────────────

/// Wall-clock anchored at creation that advances with tokio's clock, so
/// `tokio::time::pause` / `advance` move it too.
pub struct TokioClock {
    origin: Timestamp,
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self {
            origin: time::now(),
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Timestamp {
        add_duration(self.origin, self.started.elapsed())
    }
}

// ── Automations ────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryAutomationRepo {
    store: Mutex<HashMap<AutomationId, AutomationDefinition>>,
}

impl InMemoryAutomationRepo {
    pub fn with(automations: Vec<AutomationDefinition>) -> Self {
        let map: HashMap<_, _> = automations.into_iter().map(|a| (a.id, a)).collect();
        Self {
            store: Mutex::new(map),
        }
    }
}

impl AutomationRepository for InMemoryAutomationRepo {
    fn create(
        &self,
        automation: AutomationDefinition,
    ) -> impl Future<Output = Result<AutomationDefinition, KeywardError>> + Send {
        self.store
            .lock()
            .unwrap()
            .insert(automation.id, automation.clone());
        async { Ok(automation) }
    }

    fn get_by_id(
        &self,
        id: AutomationId,
    ) -> impl Future<Output = Result<Option<AutomationDefinition>, KeywardError>> + Send {
        let result = self.store.lock().unwrap().get(&id).cloned();
        async { Ok(result) }
    }

    fn get_all(
        &self,
    ) -> impl Future<Output = Result<Vec<AutomationDefinition>, KeywardError>> + Send {
        let result: Vec<_> = self.store.lock().unwrap().values().cloned().collect();
        async { Ok(result) }
    }

    fn get_enabled(
        &self,
    ) -> impl Future<Output = Result<Vec<AutomationDefinition>, KeywardError>> + Send {
        let result: Vec<_> = self
            .store
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.enabled)
            .cloned()
            .collect();
        async { Ok(result) }
    }

    fn update(
        &self,
        automation: AutomationDefinition,
    ) -> impl Future<Output = Result<AutomationDefinition, KeywardError>> + Send {
        self.store
            .lock()
            .unwrap()
            .insert(automation.id, automation.clone());
        async { Ok(automation) }
    }

    fn delete(&self, id: AutomationId) -> impl Future<Output = Result<(), KeywardError>> + Send {
        self.store.lock().unwrap().remove(&id);
        async { Ok(()) }
    }
}

// ── Users ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryUserStore {
    store: Mutex<HashMap<String, User>>,
}

impl InMemoryUserStore {
    pub fn with(users: Vec<User>) -> Self {
        let map: HashMap<_, _> = users.into_iter().map(|u| (u.id.clone(), u)).collect();
        Self {
            store: Mutex::new(map),
        }
    }

    pub fn snapshot(&self, id: &str) -> Option<User> {
        self.store.lock().unwrap().get(id).cloned()
    }

    /// Change a stored user the way a concurrent writer would.
    pub fn modify(&self, id: &str, change: impl FnOnce(&mut User)) {
        if let Some(user) = self.store.lock().unwrap().get_mut(id) {
            change(user);
            user.version += 1;
        }
    }
}

impl UserStore for InMemoryUserStore {
    fn create(&self, user: User) -> impl Future<Output = Result<User, KeywardError>> + Send {
        self.store
            .lock()
            .unwrap()
            .insert(user.id.clone(), user.clone());
        async { Ok(user) }
    }

    fn get_by_id(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<User>, KeywardError>> + Send {
        let result = self.snapshot(id);
        async { Ok(result) }
    }

    fn get_by_username(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<Option<User>, KeywardError>> + Send {
        let result = self
            .store
            .lock()
            .unwrap()
            .values()
            .find(|u| u.username == username)
            .cloned();
        async { Ok(result) }
    }

    fn update(&self, mut user: User) -> impl Future<Output = Result<User, KeywardError>> + Send {
        let mut store = self.store.lock().unwrap();
        let result = match store.get(&user.id) {
            None => Err(NotFoundError {
                entity: "User",
                id: user.id.clone(),
            }
            .into()),
            Some(stored) if stored.version != user.version => Err(ConflictError {
                entity: "User",
                id: user.id.clone(),
            }
            .into()),
            Some(_) => {
                user.version += 1;
                store.insert(user.id.clone(), user.clone());
                Ok(user)
            }
        };
        async { result }
    }

    fn delete(&self, id: &str) -> impl Future<Output = Result<bool, KeywardError>> + Send {
        let removed = self.store.lock().unwrap().remove(id).is_some();
        async move { Ok(removed) }
    }

    fn list_page(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<User>, KeywardError>> + Send {
        let mut users: Vec<User> = self
            .store
            .lock()
            .unwrap()
            .values()
            .filter(|u| after.is_none_or(|after| u.id.as_str() > after))
            .cloned()
            .collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        users.truncate(limit);
        async { Ok(users) }
    }
}

// ── Scheduled steps ────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryScheduledStepStore {
    store: Mutex<HashMap<String, ScheduledStep>>,
    activations: Mutex<HashSet<(AutomationId, String)>>,
}

impl InMemoryScheduledStepStore {
    pub fn len(&self) -> usize {
        self.store.lock().unwrap().len()
    }

    pub fn was_activated(&self, automation_id: AutomationId, resource_id: &str) -> bool {
        self.activations
            .lock()
            .unwrap()
            .contains(&(automation_id, resource_id.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ScheduledStepStore for InMemoryScheduledStepStore {
    fn upsert(
        &self,
        step: ScheduledStep,
    ) -> impl Future<Output = Result<ScheduledStep, KeywardError>> + Send {
        self.store
            .lock()
            .unwrap()
            .insert(step.key.clone(), step.clone());
        async { Ok(step) }
    }

    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<ScheduledStep>, KeywardError>> + Send {
        let result = self.store.lock().unwrap().get(key).cloned();
        async { Ok(result) }
    }

    fn delete(&self, key: &str) -> impl Future<Output = Result<bool, KeywardError>> + Send {
        let removed = self.store.lock().unwrap().remove(key).is_some();
        async move { Ok(removed) }
    }

    fn get_due(
        &self,
        now: Timestamp,
    ) -> impl Future<Output = Result<Vec<ScheduledStep>, KeywardError>> + Send {
        let mut due: Vec<_> = self
            .store
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.due_at);
        async { Ok(due) }
    }

    fn get_all(&self) -> impl Future<Output = Result<Vec<ScheduledStep>, KeywardError>> + Send {
        let result: Vec<_> = self.store.lock().unwrap().values().cloned().collect();
        async { Ok(result) }
    }

    fn get_by_automation(
        &self,
        automation_id: AutomationId,
    ) -> impl Future<Output = Result<Vec<ScheduledStep>, KeywardError>> + Send {
        let result: Vec<_> = self
            .store
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.automation_id == automation_id)
            .cloned()
            .collect();
        async { Ok(result) }
    }

    fn delete_by_automation(
        &self,
        automation_id: AutomationId,
    ) -> impl Future<Output = Result<u64, KeywardError>> + Send {
        let mut store = self.store.lock().unwrap();
        let before = store.len();
        store.retain(|_, s| s.automation_id != automation_id);
        let removed = (before - store.len()) as u64;
        drop(store);
        self.activations
            .lock()
            .unwrap()
            .retain(|(id, _)| *id != automation_id);
        async move { Ok(removed) }
    }

    fn mark_activated(
        &self,
        automation_id: AutomationId,
        resource_id: &str,
        _at: Timestamp,
    ) -> impl Future<Output = Result<bool, KeywardError>> + Send {
        let inserted = self
            .activations
            .lock()
            .unwrap()
            .insert((automation_id, resource_id.to_string()));
        async move { Ok(inserted) }
    }
}

// ── Sync providers ─────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemorySyncProviderRepo {
    store: Mutex<HashMap<SyncProviderId, SyncProviderConfig>>,
}

impl InMemorySyncProviderRepo {
    pub fn with(providers: Vec<SyncProviderConfig>) -> Self {
        let map: HashMap<_, _> = providers.into_iter().map(|p| (p.id, p)).collect();
        Self {
            store: Mutex::new(map),
        }
    }

    pub fn snapshot(&self, id: SyncProviderId) -> Option<SyncProviderConfig> {
        self.store.lock().unwrap().get(&id).cloned()
    }

    pub fn remove(&self, id: SyncProviderId) {
        self.store.lock().unwrap().remove(&id);
    }
}

impl SyncProviderRepository for InMemorySyncProviderRepo {
    fn create(
        &self,
        provider: SyncProviderConfig,
    ) -> impl Future<Output = Result<SyncProviderConfig, KeywardError>> + Send {
        self.store
            .lock()
            .unwrap()
            .insert(provider.id, provider.clone());
        async { Ok(provider) }
    }

    fn get_by_id(
        &self,
        id: SyncProviderId,
    ) -> impl Future<Output = Result<Option<SyncProviderConfig>, KeywardError>> + Send {
        let result = self.snapshot(id);
        async { Ok(result) }
    }

    fn get_all(
        &self,
    ) -> impl Future<Output = Result<Vec<SyncProviderConfig>, KeywardError>> + Send {
        let result: Vec<_> = self.store.lock().unwrap().values().cloned().collect();
        async { Ok(result) }
    }

    fn update(
        &self,
        provider: SyncProviderConfig,
    ) -> impl Future<Output = Result<SyncProviderConfig, KeywardError>> + Send {
        self.store
            .lock()
            .unwrap()
            .insert(provider.id, provider.clone());
        async { Ok(provider) }
    }

    fn delete(
        &self,
        id: SyncProviderId,
    ) -> impl Future<Output = Result<(), KeywardError>> + Send {
        self.remove(id);
        async { Ok(()) }
    }

    fn update_last_sync(
        &self,
        id: SyncProviderId,
        mode: SyncMode,
        at: i64,
    ) -> impl Future<Output = Result<(), KeywardError>> + Send {
        if let Some(provider) = self.store.lock().unwrap().get_mut(&id) {
            provider.set_last_sync(mode, at);
        }
        async { Ok(()) }
    }
}

// ── Directory ──────────────────────────────────────────────────────

/// Directory that records every call and returns a fixed result.
pub struct FakeDirectory {
    pub calls: Mutex<Vec<(SyncProviderId, SyncMode)>>,
    pub result: SynchronizationResult,
}

impl FakeDirectory {
    pub fn returning(result: SynchronizationResult) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            result,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl DirectoryProvider for FakeDirectory {
    fn id(&self) -> &str {
        "fake"
    }

    fn sync_all<'a>(
        &'a self,
        provider: &'a SyncProviderConfig,
    ) -> BoxFuture<'a, Result<SynchronizationResult, KeywardError>> {
        self.calls.lock().unwrap().push((provider.id, SyncMode::Full));
        Box::pin(async move { Ok(self.result) })
    }

    fn sync_since<'a>(
        &'a self,
        provider: &'a SyncProviderConfig,
        _since: Timestamp,
    ) -> BoxFuture<'a, Result<SynchronizationResult, KeywardError>> {
        self.calls
            .lock()
            .unwrap()
            .push((provider.id, SyncMode::Incremental));
        Box::pin(async move { Ok(self.result) })
    }
}
