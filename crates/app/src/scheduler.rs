//! Node-local timers, one per task name.
//!
//! Scheduling a name that is already registered replaces the previous timer
//! atomically: the old one never fires again. Firing is not cluster
//! exclusive; tasks that must run once per cluster wrap their body in the
//! [`LeaseCoordinator`](crate::lease_coordinator::LeaseCoordinator).

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use keyward_domain::schedule::ScheduledTask;
use keyward_domain::time::{Timestamp, add_duration};

use crate::ports::Clock;

/// What a timer does after its task returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskControl {
    /// Periodic timers wait for the next period, one-shot timers finish.
    Continue,
    /// Fire again after the given delay, periodic or not.
    RetryAfter(Duration),
    /// Unregister the timer.
    Cancel,
}

/// Body of a timer, invoked on every firing.
pub type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, TaskControl> + Send + Sync>;

/// Wrap an async closure into a [`TaskFn`].
pub fn task_fn<F, Fut>(f: F) -> TaskFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskControl> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// A registered timer, as returned when it is replaced or cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerTaskContext {
    pub task: ScheduledTask,
    pub registered_at: Timestamp,
}

struct Entry {
    generation: u64,
    context: TimerTaskContext,
    cancellation: CancellationToken,
}

struct Inner {
    timers: Mutex<HashMap<String, Entry>>,
    next_generation: AtomicU64,
    clock: Arc<dyn Clock>,
    /// Parent of every timer token.
    shutdown: CancellationToken,
}

impl Inner {
    fn timers(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_next_due(&self, name: &str, generation: u64, wait: Duration) {
        let due_at = add_duration(self.clock.now(), wait);
        if let Some(entry) = self.timers().get_mut(name) {
            if entry.generation == generation {
                entry.context.task.due_at = due_at;
            }
        }
    }

    fn remove_if_current(&self, name: &str, generation: u64) {
        let mut timers = self.timers();
        if timers
            .get(name)
            .is_some_and(|entry| entry.generation == generation)
        {
            timers.remove(name);
        }
    }
}

/// Registry of named timers running on the tokio runtime of this node.
#[derive(Clone)]
pub struct LocalScheduler {
    inner: Arc<Inner>,
}

impl LocalScheduler {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                timers: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                clock,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Register `task` to fire after `delay`, then every `period` if given.
    ///
    /// Returns the context of the timer this one replaced. After
    /// [`shutdown`](Self::shutdown) the timer is registered but never fires.
    pub fn schedule(
        &self,
        name: impl Into<String>,
        delay: Duration,
        period: Option<Duration>,
        task: TaskFn,
    ) -> Option<TimerTaskContext> {
        let name = name.into();
        let now = self.inner.clock.now();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancellation = self.inner.shutdown.child_token();
        let entry = Entry {
            generation,
            context: TimerTaskContext {
                task: ScheduledTask {
                    task_key: name.clone(),
                    due_at: add_duration(now, delay),
                    period,
                },
                registered_at: now,
            },
            cancellation: cancellation.clone(),
        };

        let mut timers = self.inner.timers();
        let previous = timers.insert(name.clone(), entry);
        if let Some(previous) = &previous {
            previous.cancellation.cancel();
        }
        tokio::spawn(run_timer(
            Arc::downgrade(&self.inner),
            name,
            generation,
            delay,
            period,
            task,
            cancellation,
        ));
        drop(timers);

        previous.map(|entry| entry.context)
    }

    /// Unregister the timer named `name`. A firing already in progress
    /// completes; no further firing happens.
    pub fn cancel(&self, name: &str) -> Option<TimerTaskContext> {
        let entry = self.inner.timers().remove(name)?;
        entry.cancellation.cancel();
        tracing::debug!(task = name, "timer cancelled");
        Some(entry.context)
    }

    /// Whether a timer named `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.timers().contains_key(name)
    }

    /// Scheduling details of the timer named `name`.
    #[must_use]
    pub fn context(&self, name: &str) -> Option<TimerTaskContext> {
        self.inner.timers().get(name).map(|entry| entry.context.clone())
    }

    /// Names of all registered timers, sorted.
    #[must_use]
    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.timers().keys().cloned().collect();
        names.sort();
        names
    }

    /// Cancel every timer, including timers scheduled later on.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let count = self.inner.timers().drain().count();
        tracing::debug!(count, "scheduler shut down");
    }
}

async fn run_timer(
    inner: Weak<Inner>,
    name: String,
    generation: u64,
    delay: Duration,
    period: Option<Duration>,
    task: TaskFn,
    cancellation: CancellationToken,
) {
    let mut wait = delay;
    loop {
        tokio::select! {
            () = cancellation.cancelled() => break,
            () = tokio::time::sleep(wait) => {}
        }
        if cancellation.is_cancelled() || inner.strong_count() == 0 {
            break;
        }

        match task().await {
            TaskControl::Continue => match period {
                Some(period) => wait = period,
                None => break,
            },
            TaskControl::RetryAfter(delay) => wait = delay,
            TaskControl::Cancel => {
                tracing::debug!(task = %name, "timer cancelled itself");
                break;
            }
        }

        match inner.upgrade() {
            Some(inner) => inner.set_next_due(&name, generation, wait),
            None => return,
        }
    }

    if let Some(inner) = inner.upgrade() {
        inner.remove_if_current(&name, generation);
    }
}
