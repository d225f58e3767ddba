//! Automation engine: reacts to domain events by activating automations.
//!
//! A raw event is normalized synchronously on the delivering task, then the
//! rest of the work is enlisted in the caller's transaction. On activation,
//! immediate steps run inline and delayed steps are persisted and armed as
//! local timers. A due step runs under a per-step lease, after the resource
//! is reloaded and the trigger condition re-checked.
//!
//! Every node arms timers for every persisted step. The lease decides which
//! node applies it; the record is deleted once the step ran, so later
//! firings on other nodes find nothing to do. A periodic step runner sweeps
//! due steps whose timers were lost, on one node per interval.
//!
//! An automation with activation conditions only activates for users that
//! satisfy them, and the conditions are checked again before a delayed step
//! runs. Scheduled automations are activated by a periodic sweep instead of
//! events: one node per period pages through the users and activates the
//! automation for up to a batch of users it never ran for.

use std::sync::Arc;
use std::time::Duration;

use keyward_domain::automation::AutomationDefinition;
use keyward_domain::cluster::ClusterEvent;
use keyward_domain::error::KeywardError;
use keyward_domain::event::{AutomationEvent, DomainEvent, ResourceType};
use keyward_domain::id::AutomationId;
use keyward_domain::outcome::Outcome;
use keyward_domain::schedule::ScheduledStep;
use keyward_domain::time::{Timestamp, remaining};

use crate::executor::{StepExecutor, StepRunReport};
use crate::lease_coordinator::LeaseCoordinator;
use crate::ports::{AutomationRepository, LeaseStore, ScheduledStepStore, UserStore};
use crate::registry::AutomationRegistry;
use crate::runtime::NodeRuntime;
use crate::scheduler::{TaskControl, task_fn};
use crate::task_queue::{TaskHandle, Transaction};

/// Timer name and lease key of the periodic sweep of due steps.
pub const STEP_RUNNER_TASK: &str = "automation-step-runner";

/// Timer name and lease key of one persisted step.
#[must_use]
pub fn step_task_name(key: &str) -> String {
    format!("automation-step::{key}")
}

/// Timer name and lease key of the sweep of a scheduled automation.
#[must_use]
pub fn schedule_task_name(automation_id: AutomationId) -> String {
    format!("automation-schedule::{automation_id}")
}

/// Tunables of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Lease TTL of a single delayed step. Must exceed the time a step takes.
    pub step_lease_ttl: Duration,
    /// Period of the sweep of due steps.
    pub step_runner_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            step_lease_ttl: Duration::from_secs(30),
            step_runner_interval: Duration::from_secs(12 * 60 * 60),
        }
    }
}

struct Inner<AR, US, SS, LS> {
    registry: AutomationRegistry<AR>,
    executor: StepExecutor<US>,
    steps: SS,
    leases: LeaseCoordinator<LS>,
    runtime: NodeRuntime,
    settings: EngineSettings,
}

/// The automation engine of one node. Cheap to clone.
pub struct AutomationEngine<AR, US, SS, LS> {
    inner: Arc<Inner<AR, US, SS, LS>>,
}

impl<AR, US, SS, LS> Clone for AutomationEngine<AR, US, SS, LS> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<AR, US, SS, LS> AutomationEngine<AR, US, SS, LS>
where
    AR: AutomationRepository + Send + Sync + 'static,
    US: UserStore + Send + Sync + 'static,
    SS: ScheduledStepStore + Send + Sync + 'static,
    LS: LeaseStore + Send + Sync + 'static,
{
    /// Assemble an engine. Nothing runs until [`start`](Self::start).
    pub fn new(
        registry: AutomationRegistry<AR>,
        executor: StepExecutor<US>,
        steps: SS,
        leases: LeaseCoordinator<LS>,
        runtime: NodeRuntime,
        settings: EngineSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                executor,
                steps,
                leases,
                runtime,
                settings,
            }),
        }
    }

    /// Automations this engine matches events against.
    #[must_use]
    pub fn registry(&self) -> &AutomationRegistry<AR> {
        &self.inner.registry
    }

    /// Scheduler and queue of this node.
    #[must_use]
    pub fn runtime(&self) -> &NodeRuntime {
        &self.inner.runtime
    }

    /// Id under which this node takes step leases.
    #[must_use]
    pub fn node_id(&self) -> &str {
        self.inner.leases.node_id()
    }

    /// Re-arm persisted steps and the sweeps of enabled scheduled
    /// automations, then start the periodic step runner.
    ///
    /// Returns the number of re-armed steps.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the persisted steps or the automations
    /// cannot be read.
    pub async fn start(&self) -> Result<usize, KeywardError> {
        let rearmed = self.reschedule_pending().await?;
        for automation in self.inner.registry.all().await? {
            self.arm_schedule(&automation);
        }
        let interval = self.inner.settings.step_runner_interval;
        let weak = Arc::downgrade(&self.inner);
        self.inner.runtime.scheduler.schedule(
            STEP_RUNNER_TASK,
            interval,
            Some(interval),
            task_fn(move || {
                let weak = weak.clone();
                async move {
                    let Some(inner) = weak.upgrade() else {
                        return TaskControl::Cancel;
                    };
                    Self { inner }.run_step_runner().await;
                    TaskControl::Continue
                }
            }),
        );
        tracing::info!(rearmed, ?interval, "automation engine started");
        Ok(rearmed)
    }

    /// Entry point for raw domain events.
    ///
    /// Normalizes `raw` right away; matching automations and running their
    /// steps is deferred until `tx` commits, or submitted immediately
    /// without a transaction. Events nothing is interested in are dropped.
    pub async fn on_event(&self, raw: &DomainEvent, tx: Option<&Transaction>) -> Option<TaskHandle> {
        let now = self.inner.runtime.clock.now();
        let event = self.inner.registry.matcher().create(raw, now)?;
        let engine = self.clone();
        let job = Box::pin(async move {
            if let Err(err) = engine.process(&event).await {
                tracing::error!(
                    provider_id = %event.provider_id,
                    resource_id = %event.resource_id,
                    error = %err,
                    "failed to process automation event"
                );
            }
        });
        self.inner.runtime.queue.enlist(tx, job).await
    }

    /// Activate every enabled automation `event` matches.
    ///
    /// Returns the ids of the activated automations. An automation that
    /// fails to activate is logged and does not stop the others.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the automations cannot be loaded.
    #[tracing::instrument(skip(self, event), fields(provider_id = %event.provider_id, resource_id = %event.resource_id))]
    pub async fn process(&self, event: &AutomationEvent) -> Result<Vec<AutomationId>, KeywardError> {
        let automations = self.inner.registry.matching(event).await?;
        let mut triggered = Vec::with_capacity(automations.len());
        for automation in &automations {
            match self
                .activate(automation, &event.resource_id, event.occurred_at)
                .await
            {
                Ok(Some(_)) => triggered.push(automation.id),
                Ok(None) => tracing::debug!(
                    automation_id = %automation.id,
                    "activation conditions do not hold"
                ),
                Err(err) => tracing::error!(
                    automation_id = %automation.id,
                    name = %automation.name,
                    error = %err,
                    "failed to activate automation"
                ),
            }
        }
        if triggered.is_empty() {
            tracing::debug!("no automation matched");
        }
        Ok(triggered)
    }

    /// Run `automation_id` for `resource_id` on demand, without an event.
    ///
    /// Returns [`Outcome::NotFound`] for an unknown automation, and
    /// [`Outcome::Ignored`] for a disabled one or when the resource does not
    /// satisfy its activation conditions.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a blank resource id, a storage error,
    /// or [`KeywardError::ProviderNotFound`].
    #[tracing::instrument(skip(self))]
    pub async fn run_ad_hoc(
        &self,
        automation_id: AutomationId,
        resource_id: &str,
    ) -> Result<Outcome<StepRunReport>, KeywardError> {
        let Some(automation) = self.inner.registry.get(automation_id).await? else {
            return Ok(Outcome::NotFound);
        };
        if !automation.enabled {
            tracing::debug!("automation disabled");
            return Ok(Outcome::Ignored);
        }
        let event = AutomationEvent::ad_hoc(
            ResourceType::Users,
            resource_id,
            self.inner.runtime.clock.now(),
        )?;
        let report = self
            .activate(&automation, &event.resource_id, event.occurred_at)
            .await?;
        Ok(report.map_or(Outcome::Ignored, Outcome::Executed))
    }

    /// Whether the resource satisfies the activation conditions of
    /// `automation`. A missing resource satisfies none.
    async fn admits(
        &self,
        automation: &AutomationDefinition,
        resource_id: &str,
    ) -> Result<bool, KeywardError> {
        let Some(conditions) = &automation.conditions else {
            return Ok(true);
        };
        let Some(user) = self.inner.executor.users().get_by_id(resource_id).await? else {
            return Ok(false);
        };
        self.inner
            .registry
            .matcher()
            .conditions_hold(Some(conditions), &user)
    }

    /// Run `automation` for `resource_id` if its conditions hold. Returns
    /// `None` when they do not.
    async fn activate(
        &self,
        automation: &AutomationDefinition,
        resource_id: &str,
        triggered_at: Timestamp,
    ) -> Result<Option<StepRunReport>, KeywardError> {
        if !self.admits(automation, resource_id).await? {
            return Ok(None);
        }
        if automation.schedule.is_some() {
            self.inner
                .steps
                .mark_activated(automation.id, resource_id, triggered_at)
                .await?;
        }
        self.run_activation(automation, resource_id, triggered_at)
            .await
            .map(Some)
    }

    async fn run_activation(
        &self,
        automation: &AutomationDefinition,
        resource_id: &str,
        triggered_at: Timestamp,
    ) -> Result<StepRunReport, KeywardError> {
        let (immediate, delayed): (Vec<_>, Vec<_>) = automation
            .ordered_steps()
            .into_iter()
            .partition(|step| step.is_immediate());

        let report = self
            .inner
            .executor
            .run_all(automation.id, &immediate, resource_id)
            .await?;

        for step in delayed {
            let record =
                ScheduledStep::new(automation.id, step.id, resource_id, triggered_at, step.after);
            self.inner.steps.upsert(record.clone()).await?;
            self.arm(&record);
        }

        tracing::info!(
            automation_id = %automation.id,
            resource_id,
            applied = report.applied.len(),
            failed = report.failed.len(),
            "automation activated"
        );
        Ok(report)
    }

    fn arm(&self, record: &ScheduledStep) {
        let delay = remaining(self.inner.runtime.clock.now(), record.due_at);
        let weak = Arc::downgrade(&self.inner);
        let key = record.key.clone();
        self.inner.runtime.scheduler.schedule(
            step_task_name(&record.key),
            delay,
            None,
            task_fn(move || {
                let weak = weak.clone();
                let key = key.clone();
                async move {
                    match weak.upgrade() {
                        Some(inner) => Self { inner }.fire_step(&key).await,
                        None => TaskControl::Cancel,
                    }
                }
            }),
        );
    }

    async fn fire_step(&self, key: &str) -> TaskControl {
        let record = match self.inner.steps.get(key).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::debug!(task = key, "scheduled step no longer exists");
                return TaskControl::Cancel;
            }
            Err(err) => {
                tracing::warn!(task = key, error = %err, "failed to load scheduled step");
                return TaskControl::RetryAfter(self.inner.settings.step_lease_ttl);
            }
        };
        let now = self.inner.runtime.clock.now();
        if !record.is_due(now) {
            return TaskControl::RetryAfter(remaining(now, record.due_at));
        }

        let engine = self.clone();
        let key = record.key;
        let queue = &self.inner.runtime.queue;
        let job = Box::pin(async move {
            match engine.run_scheduled_step(&key).await {
                Ok(outcome) => tracing::debug!(task = %key, ?outcome, "scheduled step finished"),
                Err(err) => tracing::error!(task = %key, error = %err, "scheduled step failed"),
            }
        });
        queue.submit(job, queue.options()).await;
        TaskControl::Continue
    }

    /// Run the persisted step `key` if it is due and no other node is
    /// running it.
    ///
    /// The record is kept while its automation is disabled and deleted once
    /// the step ran, was skipped because the trigger condition no longer
    /// holds, or lost its automation, step or resource.
    ///
    /// # Errors
    ///
    /// Returns a storage error, the error of a failed step, or
    /// [`KeywardError::ProviderNotFound`].
    #[tracing::instrument(skip(self))]
    pub async fn run_scheduled_step(&self, key: &str) -> Result<Outcome<()>, KeywardError> {
        let run = self
            .inner
            .leases
            .execute_if_not_executed(
                &step_task_name(key),
                self.inner.settings.step_lease_ttl,
                self.run_step_record(key),
            )
            .await?;
        run.into_result().unwrap_or(Ok(Outcome::Ignored))
    }

    async fn run_step_record(&self, key: &str) -> Result<Outcome<()>, KeywardError> {
        let inner = &self.inner;
        let Some(record) = inner.steps.get(key).await? else {
            return Ok(Outcome::NotFound);
        };
        if !record.is_due(inner.runtime.clock.now()) {
            return Ok(Outcome::Ignored);
        }

        let Some(automation) = inner.registry.get(record.automation_id).await? else {
            tracing::debug!("automation no longer exists, dropping step");
            inner.steps.delete(key).await?;
            return Ok(Outcome::NotFound);
        };
        if !automation.enabled {
            tracing::debug!("automation disabled, step paused");
            return Ok(Outcome::Ignored);
        }
        let Some(step) = automation.step(record.step_id) else {
            tracing::debug!("step no longer part of the automation, dropping it");
            inner.steps.delete(key).await?;
            return Ok(Outcome::NotFound);
        };
        let Some(user) = inner.executor.users().get_by_id(&record.resource_id).await? else {
            tracing::debug!("resource no longer exists, dropping step");
            inner.steps.delete(key).await?;
            return Ok(Outcome::NotFound);
        };
        if !inner.registry.matcher().still_holds(&automation.trigger, &user)? {
            tracing::info!(trigger = %automation.trigger, "trigger condition no longer holds, skipping step");
            inner.steps.delete(key).await?;
            return Ok(Outcome::Ignored);
        }
        if !inner
            .registry
            .matcher()
            .conditions_hold(automation.conditions.as_ref(), &user)?
        {
            tracing::info!("activation conditions no longer hold, skipping step");
            inner.steps.delete(key).await?;
            return Ok(Outcome::Ignored);
        }

        let result = inner
            .executor
            .execute(automation.id, step, &record.resource_id)
            .await;
        inner.steps.delete(key).await?;
        result
    }

    /// Run every due step. Returns how many were applied.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the due steps cannot be listed. Failures
    /// of single steps are logged.
    pub async fn run_due_steps(&self) -> Result<usize, KeywardError> {
        let due = self
            .inner
            .steps
            .get_due(self.inner.runtime.clock.now())
            .await?;
        let mut applied = 0;
        for record in due {
            match self.run_scheduled_step(&record.key).await {
                Ok(Outcome::Executed(())) => applied += 1,
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(task = %record.key, error = %err, "scheduled step failed");
                }
            }
        }
        Ok(applied)
    }

    async fn run_step_runner(&self) {
        let interval = self.inner.settings.step_runner_interval;
        let run = self
            .inner
            .leases
            .execute_if_not_executed(STEP_RUNNER_TASK, interval, self.run_due_steps())
            .await;
        match run.map(|run| run.into_result()) {
            Ok(Some(Ok(applied))) => tracing::info!(applied, "due steps executed"),
            Ok(Some(Err(err))) => tracing::error!(error = %err, "step runner failed"),
            Ok(None) => tracing::debug!("step runner already running on another node"),
            Err(err) => tracing::warn!(error = %err, "step runner could not take its lease"),
        }
    }

    fn arm_schedule(&self, automation: &AutomationDefinition) {
        let Some(schedule) = automation.schedule.filter(|_| automation.enabled) else {
            return;
        };
        let automation_id = automation.id;
        let weak = Arc::downgrade(&self.inner);
        self.inner.runtime.scheduler.schedule(
            schedule_task_name(automation_id),
            schedule.every,
            Some(schedule.every),
            task_fn(move || {
                let weak = weak.clone();
                async move {
                    let Some(inner) = weak.upgrade() else {
                        return TaskControl::Cancel;
                    };
                    Self { inner }.run_schedule_task(automation_id, schedule.every).await;
                    TaskControl::Continue
                }
            }),
        );
        tracing::debug!(%automation_id, every = ?schedule.every, "automation schedule armed");
    }

    async fn run_schedule_task(&self, automation_id: AutomationId, every: Duration) {
        let run = self
            .inner
            .leases
            .execute_if_not_executed(
                &schedule_task_name(automation_id),
                every,
                self.run_schedule(automation_id),
            )
            .await;
        match run.map(|run| run.into_result()) {
            Ok(Some(Ok(outcome))) => tracing::info!(%automation_id, ?outcome, "schedule sweep finished"),
            Ok(Some(Err(err))) => tracing::error!(%automation_id, error = %err, "schedule sweep failed"),
            Ok(None) => tracing::debug!(%automation_id, "schedule sweep already running on another node"),
            Err(err) => tracing::warn!(%automation_id, error = %err, "schedule sweep could not take its lease"),
        }
    }

    /// Activate the scheduled automation `automation_id` for up to one batch
    /// of users it never ran for. Users are visited in id order; users that
    /// do not satisfy the conditions are left for later sweeps.
    ///
    /// Returns how many users were activated, [`Outcome::NotFound`] for an
    /// unknown automation and [`Outcome::Ignored`] for a disabled or
    /// unscheduled one.
    ///
    /// # Errors
    ///
    /// Returns a storage error or [`KeywardError::ProviderNotFound`].
    /// Failures of single activations are logged.
    #[tracing::instrument(skip(self))]
    pub async fn run_schedule(&self, automation_id: AutomationId) -> Result<Outcome<usize>, KeywardError> {
        let inner = &self.inner;
        let Some(automation) = inner.registry.get(automation_id).await? else {
            return Ok(Outcome::NotFound);
        };
        let Some(schedule) = automation.schedule.filter(|_| automation.enabled) else {
            return Ok(Outcome::Ignored);
        };
        let batch_size = schedule.batch_size;
        let mut activated = 0;
        let mut after: Option<String> = None;
        'pages: loop {
            let page = inner
                .executor
                .users()
                .list_page(after.as_deref(), batch_size)
                .await?;
            for user in &page {
                if activated >= batch_size {
                    break 'pages;
                }
                if !inner
                    .registry
                    .matcher()
                    .conditions_hold(automation.conditions.as_ref(), user)?
                {
                    continue;
                }
                let now = inner.runtime.clock.now();
                if !inner.steps.mark_activated(automation.id, &user.id, now).await? {
                    continue;
                }
                match self.run_activation(&automation, &user.id, now).await {
                    Ok(_) => activated += 1,
                    Err(err) => tracing::error!(
                        resource_id = %user.id,
                        error = %err,
                        "failed to activate scheduled automation"
                    ),
                }
            }
            if page.len() < batch_size {
                break;
            }
            after = page.last().map(|user| user.id.clone());
        }
        Ok(Outcome::Executed(activated))
    }

    /// Arm a timer for every persisted step. Returns the number of steps.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the steps cannot be listed.
    pub async fn reschedule_pending(&self) -> Result<usize, KeywardError> {
        let records = self.inner.steps.get_all().await?;
        for record in &records {
            self.arm(record);
        }
        Ok(records.len())
    }

    /// Replace the local timers of `automation_id` with fresh ones for its
    /// persisted steps and, while it is enabled, its schedule.
    ///
    /// Returns the number of re-armed steps.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the steps or the automation cannot be
    /// read.
    pub async fn reschedule_automation(&self, automation_id: AutomationId) -> Result<usize, KeywardError> {
        self.cancel_local(automation_id);
        let records = self.inner.steps.get_by_automation(automation_id).await?;
        for record in &records {
            self.arm(record);
        }
        if let Some(automation) = self.inner.registry.get(automation_id).await? {
            self.arm_schedule(&automation);
        }
        tracing::debug!(%automation_id, count = records.len(), "automation steps rescheduled");
        Ok(records.len())
    }

    /// Cancel the local step and schedule timers of `automation_id`.
    /// Persisted steps stay.
    pub fn cancel_local(&self, automation_id: AutomationId) -> usize {
        let prefix = step_task_name(&format!("{automation_id}:"));
        let schedule = schedule_task_name(automation_id);
        let scheduler = &self.inner.runtime.scheduler;
        let names: Vec<String> = scheduler
            .task_names()
            .into_iter()
            .filter(|name| name.starts_with(&prefix) || *name == schedule)
            .collect();
        for name in &names {
            scheduler.cancel(name);
        }
        names.len()
    }

    /// Drop every pending step and activation record of `automation_id`,
    /// locally and in the store.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the records cannot be deleted.
    pub async fn discard_automation(&self, automation_id: AutomationId) -> Result<u64, KeywardError> {
        self.cancel_local(automation_id);
        self.inner.steps.delete_by_automation(automation_id).await
    }

    /// React to a configuration change made on another node.
    pub async fn on_cluster_event(&self, event: ClusterEvent) {
        match event {
            ClusterEvent::AutomationChanged {
                automation_id,
                removed: true,
            } => {
                self.cancel_local(automation_id);
            }
            ClusterEvent::AutomationChanged {
                automation_id,
                removed: false,
            } => {
                if let Err(err) = self.reschedule_automation(automation_id).await {
                    tracing::warn!(%automation_id, error = %err, "failed to reschedule automation");
                }
            }
            ClusterEvent::SyncProviderChanged { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::future::join;
    use keyward_domain::automation::{ScheduleSpec, StepDefinition, TriggerSpec};
    use keyward_domain::event::RoleRef;
    use keyward_domain::time::{add_duration, now};
    use keyward_domain::user::User;

    use super::*;
    use crate::matcher::EventMatcher;
    use crate::memory_lease_store::InMemoryLeaseStore;
    use crate::ports::Clock;
    use crate::providers::ProviderRegistry;
    use crate::task_queue::SubmitOptions;
    use crate::testing::{
        InMemoryAutomationRepo, InMemoryScheduledStepStore, InMemoryUserStore, TokioClock,
    };

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    type TestEngine = AutomationEngine<
        Arc<InMemoryAutomationRepo>,
        Arc<InMemoryUserStore>,
        Arc<InMemoryScheduledStepStore>,
        Arc<InMemoryLeaseStore>,
    >;

    struct Fixture {
        automations: Arc<InMemoryAutomationRepo>,
        users: Arc<InMemoryUserStore>,
        steps: Arc<InMemoryScheduledStepStore>,
        leases: Arc<InMemoryLeaseStore>,
        clock: Arc<TokioClock>,
        engine: TestEngine,
    }

    impl Fixture {
        fn new(automations: Vec<AutomationDefinition>, users: Vec<User>) -> Self {
            let automations = Arc::new(InMemoryAutomationRepo::with(automations));
            let users = Arc::new(InMemoryUserStore::with(users));
            let steps = Arc::new(InMemoryScheduledStepStore::default());
            let leases = Arc::new(InMemoryLeaseStore::new());
            let clock = Arc::new(TokioClock::new());
            let engine = build_engine(&automations, &users, &steps, &leases, &clock, "node-1");
            Self {
                automations,
                users,
                steps,
                leases,
                clock,
                engine,
            }
        }

        fn node(&self, node_id: &str) -> TestEngine {
            build_engine(
                &self.automations,
                &self.users,
                &self.steps,
                &self.leases,
                &self.clock,
                node_id,
            )
        }

        fn user(&self, id: &str) -> User {
            self.users.snapshot(id).unwrap()
        }
    }

    fn build_engine(
        automations: &Arc<InMemoryAutomationRepo>,
        users: &Arc<InMemoryUserStore>,
        steps: &Arc<InMemoryScheduledStepStore>,
        leases: &Arc<InMemoryLeaseStore>,
        clock: &Arc<TokioClock>,
        node_id: &str,
    ) -> TestEngine {
        let clock = Arc::clone(clock) as Arc<dyn Clock>;
        let providers = Arc::new(ProviderRegistry::with_defaults());
        let runtime = NodeRuntime::new(
            Arc::clone(&clock),
            4,
            SubmitOptions {
                blocking: true,
                timeout: Duration::from_secs(1),
            },
        );
        AutomationEngine::new(
            AutomationRegistry::new(Arc::clone(automations), EventMatcher::new(Arc::clone(&providers))),
            StepExecutor::new(Arc::clone(users), providers),
            Arc::clone(steps),
            LeaseCoordinator::new(Arc::clone(leases), node_id, clock),
            runtime,
            EngineSettings::default(),
        )
    }

    fn automation(trigger: &str, steps: Vec<StepDefinition>) -> AutomationDefinition {
        let mut builder = AutomationDefinition::builder()
            .name("test")
            .trigger(trigger.parse::<TriggerSpec>().unwrap());
        for step in steps {
            builder = builder.step(step);
        }
        builder.build().unwrap()
    }

    fn manager() -> RoleRef {
        RoleRef::realm("manager")
    }

    fn role_granted(user: &User) -> DomainEvent {
        DomainEvent::RoleGranted {
            user_id: user.id.clone(),
            role: manager(),
        }
    }

    fn manager_with_delayed_attribute() -> (AutomationDefinition, User) {
        let automation = automation(
            "user-role-granted(manager)",
            vec![
                StepDefinition::new("set-attribute")
                    .with("department", "sales")
                    .after(5 * DAY),
            ],
        );
        let mut user = User::new("alice", now());
        user.grant_role(manager());
        (automation, user)
    }

    #[tokio::test(start_paused = true)]
    async fn should_run_immediate_steps_when_event_matches() {
        let automation = automation(
            "user-created",
            vec![StepDefinition::new("join-group").with("group", "newcomers")],
        );
        let user = User::new("alice", now());
        let fx = Fixture::new(vec![automation], vec![user.clone()]);

        let handle = fx
            .engine
            .on_event(&DomainEvent::UserCreated { user_id: user.id.clone() }, None)
            .await;

        assert!(handle.is_some());
        assert!(fx.user(&user.id).is_member_of("/newcomers"));
        assert!(fx.steps.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_wait_for_commit_before_running_steps() {
        let automation = automation(
            "user-created",
            vec![StepDefinition::new("disable-user")],
        );
        let user = User::new("alice", now());
        let fx = Fixture::new(vec![automation], vec![user.clone()]);
        let raw = DomainEvent::UserCreated { user_id: user.id.clone() };

        let rolled_back = Transaction::begin();
        assert!(fx.engine.on_event(&raw, Some(&rolled_back)).await.is_none());
        rolled_back.rollback();
        assert!(fx.user(&user.id).enabled);

        let committed = Transaction::begin();
        fx.engine.on_event(&raw, Some(&committed)).await;
        assert!(fx.user(&user.id).enabled);

        fx.engine.runtime().queue.commit(committed).await;
        assert!(!fx.user(&user.id).enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn should_activate_healthy_automations_next_to_a_broken_one() {
        let broken = AutomationDefinition::builder()
            .name("a-broken")
            .trigger("user-created".parse::<TriggerSpec>().unwrap())
            .step(StepDefinition::new("send-postcard"))
            .build()
            .unwrap();
        let teleported = AutomationDefinition::builder()
            .name("b-unknown-trigger")
            .trigger("user-teleported".parse::<TriggerSpec>().unwrap())
            .step(StepDefinition::new("disable-user"))
            .build()
            .unwrap();
        let healthy = automation(
            "user-created",
            vec![StepDefinition::new("join-group").with("group", "newcomers")],
        );
        let healthy_id = healthy.id;
        let user = User::new("alice", now());
        let fx = Fixture::new(vec![broken, teleported, healthy], vec![user.clone()]);
        let event = fx
            .engine
            .registry()
            .matcher()
            .create(&DomainEvent::UserCreated { user_id: user.id.clone() }, now())
            .unwrap();

        let triggered = fx.engine.process(&event).await.unwrap();

        assert_eq!(triggered, vec![healthy_id]);
        assert!(fx.user(&user.id).is_member_of("/newcomers"));
    }

    #[tokio::test(start_paused = true)]
    async fn should_apply_delayed_step_only_after_its_delay() {
        let (automation, user) = manager_with_delayed_attribute();
        let fx = Fixture::new(vec![automation], vec![user.clone()]);

        fx.engine.on_event(&role_granted(&user), None).await;
        assert_eq!(fx.steps.len(), 1);

        tokio::time::sleep(4 * DAY).await;
        assert!(fx.user(&user.id).attribute("department").is_none());

        tokio::time::sleep(2 * DAY).await;
        assert_eq!(
            fx.user(&user.id).attribute("department"),
            Some(&["sales".to_string()][..])
        );
        assert!(fx.steps.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_skip_delayed_step_when_condition_no_longer_holds() {
        let (automation, user) = manager_with_delayed_attribute();
        let fx = Fixture::new(vec![automation], vec![user.clone()]);

        fx.engine.on_event(&role_granted(&user), None).await;
        fx.users.modify(&user.id, |user| {
            user.revoke_role(&manager());
        });

        tokio::time::sleep(6 * DAY).await;
        assert!(fx.user(&user.id).attribute("department").is_none());
        assert!(fx.steps.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_ignore_removal_from_another_group() {
        let automation = automation(
            "user-group-membership-removed(sales)",
            vec![StepDefinition::new("set-attribute").with("left", "sales")],
        );
        let user = User::new("alice", now());
        let fx = Fixture::new(vec![automation], vec![user.clone()]);

        fx.engine
            .on_event(
                &DomainEvent::GroupMembershipRemoved {
                    user_id: user.id.clone(),
                    group_path: "/other".to_string(),
                },
                None,
            )
            .await;

        assert!(fx.user(&user.id).attributes.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_pause_steps_of_disabled_automation_until_rescheduled() {
        let (mut automation, user) = manager_with_delayed_attribute();
        let fx = Fixture::new(vec![automation.clone()], vec![user.clone()]);

        fx.engine.on_event(&role_granted(&user), None).await;
        automation.enabled = false;
        fx.automations.update(automation.clone()).await.unwrap();

        tokio::time::sleep(6 * DAY).await;
        assert!(fx.user(&user.id).attribute("department").is_none());
        assert_eq!(fx.steps.len(), 1);

        automation.enabled = true;
        fx.automations.update(automation.clone()).await.unwrap();
        assert_eq!(fx.engine.reschedule_automation(automation.id).await.unwrap(), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(fx.user(&user.id).attribute("department").is_some());
        assert!(fx.steps.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_drop_step_of_deleted_automation() {
        let (automation, user) = manager_with_delayed_attribute();
        let fx = Fixture::new(vec![automation.clone()], vec![user.clone()]);

        fx.engine.on_event(&role_granted(&user), None).await;
        fx.automations.delete(automation.id).await.unwrap();

        tokio::time::sleep(6 * DAY).await;
        assert!(fx.user(&user.id).attribute("department").is_none());
        assert!(fx.steps.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_apply_step_once_when_nodes_race() {
        let (automation, user) = manager_with_delayed_attribute();
        let fx = Fixture::new(vec![automation.clone()], vec![user.clone()]);
        let record = ScheduledStep::new(
            automation.id,
            automation.steps[0].id,
            &user.id,
            fx.clock.now(),
            Duration::ZERO,
        );
        fx.steps.upsert(record.clone()).await.unwrap();
        let other = fx.node("node-2");

        let (first, second) = join(
            fx.engine.run_scheduled_step(&record.key),
            other.run_scheduled_step(&record.key),
        )
        .await;

        let executed = [first.unwrap(), second.unwrap()]
            .iter()
            .filter(|outcome| outcome.is_executed())
            .count();
        assert_eq!(executed, 1);
        assert!(fx.steps.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_leave_step_alone_while_another_node_holds_its_lease() {
        let (automation, user) = manager_with_delayed_attribute();
        let fx = Fixture::new(vec![automation.clone()], vec![user.clone()]);
        let at = fx.clock.now();
        let record = ScheduledStep::new(automation.id, automation.steps[0].id, &user.id, at, Duration::ZERO);
        fx.steps.upsert(record.clone()).await.unwrap();
        fx.leases
            .try_acquire(
                &step_task_name(&record.key),
                "node-2",
                at,
                add_duration(at, Duration::from_secs(30)),
            )
            .await
            .unwrap();

        let outcome = fx.engine.run_scheduled_step(&record.key).await.unwrap();

        assert_eq!(outcome, Outcome::Ignored);
        assert_eq!(fx.steps.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn should_sweep_due_steps_without_timers() {
        let (automation, user) = manager_with_delayed_attribute();
        let fx = Fixture::new(vec![automation.clone()], vec![user.clone()]);
        let record = ScheduledStep::new(
            automation.id,
            automation.steps[0].id,
            &user.id,
            fx.clock.now(),
            Duration::ZERO,
        );
        fx.steps.upsert(record).await.unwrap();

        assert_eq!(fx.engine.run_due_steps().await.unwrap(), 1);
        assert!(fx.user(&user.id).attribute("department").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn should_rearm_persisted_steps_on_start() {
        let (automation, user) = manager_with_delayed_attribute();
        let fx = Fixture::new(vec![automation.clone()], vec![user.clone()]);
        let record = ScheduledStep::new(
            automation.id,
            automation.steps[0].id,
            &user.id,
            fx.clock.now(),
            Duration::from_secs(3600),
        );
        fx.steps.upsert(record.clone()).await.unwrap();

        assert_eq!(fx.engine.start().await.unwrap(), 1);
        let scheduler = &fx.engine.runtime().scheduler;
        assert!(scheduler.contains(STEP_RUNNER_TASK));
        assert!(scheduler.contains(&step_task_name(&record.key)));

        tokio::time::sleep(Duration::from_secs(7200)).await;
        assert!(fx.user(&user.id).attribute("department").is_some());
        assert!(scheduler.contains(STEP_RUNNER_TASK));
    }

    #[tokio::test(start_paused = true)]
    async fn should_run_ad_hoc_automation_without_event() {
        let automation = automation(
            "user-created",
            vec![StepDefinition::new("add-required-action").with("action", "VERIFY_EMAIL")],
        );
        let user = User::new("alice", now());
        let fx = Fixture::new(vec![automation.clone()], vec![user.clone()]);

        let outcome = fx.engine.run_ad_hoc(automation.id, &user.id).await.unwrap();

        assert_eq!(outcome.executed().map(|report| report.applied.len()), Some(1));
        assert!(fx.user(&user.id).required_actions.contains("VERIFY_EMAIL"));
        assert_eq!(
            fx.engine.run_ad_hoc(AutomationId::new(), &user.id).await.unwrap(),
            Outcome::NotFound
        );
    }

    fn staff_only(trigger: &str, step: StepDefinition) -> AutomationDefinition {
        AutomationDefinition::builder()
            .name("staff")
            .trigger(trigger.parse::<TriggerSpec>().unwrap())
            .conditions("is-member-of(staff)".parse().unwrap())
            .step(step)
            .build()
            .unwrap()
    }

    fn staff_member(name: &str) -> User {
        let mut user = User::new(name, now());
        user.join_group("/staff");
        user
    }

    #[tokio::test(start_paused = true)]
    async fn should_activate_only_users_satisfying_conditions() {
        let automation = staff_only(
            "user-created",
            StepDefinition::new("set-attribute").with("badge", "issued"),
        );
        let alice = staff_member("alice");
        let bob = User::new("bob", now());
        let fx = Fixture::new(vec![automation], vec![alice.clone(), bob.clone()]);

        for user in [&alice, &bob] {
            fx.engine
                .on_event(&DomainEvent::UserCreated { user_id: user.id.clone() }, None)
                .await;
        }

        assert!(fx.user(&alice.id).attribute("badge").is_some());
        assert!(fx.user(&bob.id).attribute("badge").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn should_ignore_ad_hoc_run_when_conditions_fail() {
        let automation = staff_only("user-created", StepDefinition::new("disable-user"));
        let bob = User::new("bob", now());
        let fx = Fixture::new(vec![automation.clone()], vec![bob.clone()]);

        let outcome = fx.engine.run_ad_hoc(automation.id, &bob.id).await.unwrap();

        assert_eq!(outcome, Outcome::Ignored);
        assert!(fx.user(&bob.id).enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn should_skip_delayed_step_when_activation_conditions_no_longer_hold() {
        let automation = staff_only(
            "user-created",
            StepDefinition::new("set-attribute")
                .with("badge", "issued")
                .after(5 * DAY),
        );
        let alice = staff_member("alice");
        let fx = Fixture::new(vec![automation], vec![alice.clone()]);

        fx.engine
            .on_event(&DomainEvent::UserCreated { user_id: alice.id.clone() }, None)
            .await;
        assert_eq!(fx.steps.len(), 1);
        fx.users.modify(&alice.id, |user| {
            user.leave_group("/staff");
        });

        tokio::time::sleep(6 * DAY).await;
        assert!(fx.user(&alice.id).attribute("badge").is_none());
        assert!(fx.steps.is_empty());
    }

    fn onboarding_schedule(batch_size: usize) -> AutomationDefinition {
        AutomationDefinition::builder()
            .name("onboarding")
            .schedule(ScheduleSpec::every(DAY).batch_size(batch_size))
            .conditions("NOT is-member-of(external)".parse().unwrap())
            .step(StepDefinition::new("join-group").with("group", "onboarded"))
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn should_activate_each_user_once_in_batches() {
        let automation = onboarding_schedule(2);
        let mut guest = User::new("guest", now());
        guest.join_group("/external");
        let users = vec![
            User::new("alice", now()),
            User::new("bob", now()),
            User::new("carol", now()),
            guest.clone(),
        ];
        let fx = Fixture::new(vec![automation.clone()], users.clone());

        assert_eq!(fx.engine.run_schedule(automation.id).await.unwrap(), Outcome::Executed(2));
        assert_eq!(fx.engine.run_schedule(automation.id).await.unwrap(), Outcome::Executed(1));
        assert_eq!(fx.engine.run_schedule(automation.id).await.unwrap(), Outcome::Executed(0));

        for user in &users[..3] {
            assert!(fx.user(&user.id).is_member_of("/onboarded"));
            assert!(fx.steps.was_activated(automation.id, &user.id));
        }
        assert!(!fx.user(&guest.id).is_member_of("/onboarded"));
        assert!(!fx.steps.was_activated(automation.id, &guest.id));
    }

    #[tokio::test(start_paused = true)]
    async fn should_pick_up_user_once_conditions_start_to_hold() {
        let automation = onboarding_schedule(10);
        let mut guest = User::new("guest", now());
        guest.join_group("/external");
        let fx = Fixture::new(vec![automation.clone()], vec![guest.clone()]);

        assert_eq!(fx.engine.run_schedule(automation.id).await.unwrap(), Outcome::Executed(0));
        fx.users.modify(&guest.id, |user| {
            user.leave_group("/external");
        });

        assert_eq!(fx.engine.run_schedule(automation.id).await.unwrap(), Outcome::Executed(1));
        assert!(fx.user(&guest.id).is_member_of("/onboarded"));
    }

    #[tokio::test(start_paused = true)]
    async fn should_sweep_scheduled_automation_on_its_timer() {
        let automation = onboarding_schedule(10);
        let alice = User::new("alice", now());
        let fx = Fixture::new(vec![automation.clone()], vec![alice.clone()]);

        fx.engine.start().await.unwrap();
        let scheduler = &fx.engine.runtime().scheduler;
        assert!(scheduler.contains(&schedule_task_name(automation.id)));
        assert!(!fx.user(&alice.id).is_member_of("/onboarded"));

        tokio::time::sleep(DAY + Duration::from_secs(1)).await;
        assert!(fx.user(&alice.id).is_member_of("/onboarded"));

        fx.engine
            .on_cluster_event(ClusterEvent::AutomationChanged {
                automation_id: automation.id,
                removed: true,
            })
            .await;
        assert!(!scheduler.contains(&schedule_task_name(automation.id)));
    }

    #[tokio::test(start_paused = true)]
    async fn should_not_sweep_disabled_scheduled_automation() {
        let mut automation = onboarding_schedule(10);
        automation.enabled = false;
        let alice = User::new("alice", now());
        let fx = Fixture::new(vec![automation.clone()], vec![alice.clone()]);

        fx.engine.start().await.unwrap();

        assert!(!fx.engine.runtime().scheduler.contains(&schedule_task_name(automation.id)));
        assert_eq!(fx.engine.run_schedule(automation.id).await.unwrap(), Outcome::Ignored);
    }

    #[tokio::test(start_paused = true)]
    async fn should_cancel_local_timers_when_automation_removed_elsewhere() {
        let (automation, user) = manager_with_delayed_attribute();
        let fx = Fixture::new(vec![automation.clone()], vec![user.clone()]);
        fx.engine.on_event(&role_granted(&user), None).await;
        assert_eq!(fx.engine.runtime().scheduler.task_names().len(), 1);

        fx.engine
            .on_cluster_event(ClusterEvent::AutomationChanged {
                automation_id: automation.id,
                removed: true,
            })
            .await;

        assert!(fx.engine.runtime().scheduler.task_names().is_empty());
    }
}
