//! Automations: a trigger plus an ordered list of possibly delayed steps.
//!
//! An [`AutomationDefinition`] activates when an event matching its
//! [`TriggerSpec`] occurs for a resource, or when its [`ScheduleSpec`] sweep
//! reaches a user it never ran for. Optional [`ConditionExpr`] conditions
//! must hold as well. Each [`StepDefinition`] is then applied to that
//! resource, either immediately or once its `after` delay has elapsed.

mod condition;
mod step;
mod trigger;

pub use condition::{ConditionCheck, ConditionExpr};
pub use step::{RESERVED_KEYS, StepConfig, StepDefinition};
pub use trigger::TriggerSpec;

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KeywardError, ValidationError};
use crate::id::{AutomationId, StepId};

/// Trigger of automations only activated by their schedule. No event
/// matches it.
pub const SCHEDULED_TRIGGER: &str = "scheduled";

/// Users a scheduled sweep activates at most per run unless configured.
pub const DEFAULT_SCHEDULE_BATCH_SIZE: usize = 100;

fn default_batch_size() -> usize {
    DEFAULT_SCHEDULE_BATCH_SIZE
}

/// Periodic activation for users the automation never ran for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    /// Period between two sweeps.
    #[serde(with = "humantime_serde")]
    pub every: Duration,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl ScheduleSpec {
    #[must_use]
    pub fn every(every: Duration) -> Self {
        Self {
            every,
            batch_size: DEFAULT_SCHEDULE_BATCH_SIZE,
        }
    }

    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.every.is_zero() {
            return Err(ValidationError::InvalidSchedule("period must be non-zero"));
        }
        if self.batch_size == 0 {
            return Err(ValidationError::InvalidSchedule("batch size must be positive"));
        }
        Ok(())
    }
}

/// A configured automation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationDefinition {
    pub id: AutomationId,
    pub name: String,
    pub enabled: bool,
    pub trigger: TriggerSpec,
    /// Must hold for the resource at activation and before every delayed
    /// step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<ConditionExpr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleSpec>,
    pub steps: Vec<StepDefinition>,
}

impl AutomationDefinition {
    /// Create a builder for constructing an [`AutomationDefinition`].
    #[must_use]
    pub fn builder() -> AutomationBuilder {
        AutomationBuilder::default()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`KeywardError::Validation`] when:
    /// - `name` is empty ([`ValidationError::EmptyName`])
    /// - `steps` is empty ([`ValidationError::NoSteps`])
    /// - a step has no provider id ([`ValidationError::EmptyProviderId`])
    /// - two steps share an id ([`ValidationError::DuplicateStep`])
    /// - the schedule has a zero period or batch size, or the
    ///   [`SCHEDULED_TRIGGER`] is used without a schedule
    ///   ([`ValidationError::InvalidSchedule`])
    pub fn validate(&self) -> Result<(), KeywardError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        match &self.schedule {
            Some(schedule) => schedule.validate()?,
            None if self.trigger.provider_id == SCHEDULED_TRIGGER => {
                return Err(ValidationError::InvalidSchedule("scheduled trigger without schedule").into());
            }
            None => {}
        }
        if self.steps.is_empty() {
            return Err(ValidationError::NoSteps.into());
        }
        let mut seen = HashSet::with_capacity(self.steps.len());
        for step in &self.steps {
            if step.provider_id.trim().is_empty() {
                return Err(ValidationError::EmptyProviderId.into());
            }
            if !seen.insert(step.id) {
                return Err(ValidationError::DuplicateStep(step.id.to_string()).into());
            }
        }
        Ok(())
    }

    /// Steps in execution order: ascending priority, stable for ties.
    #[must_use]
    pub fn ordered_steps(&self) -> Vec<&StepDefinition> {
        let mut steps: Vec<&StepDefinition> = self.steps.iter().collect();
        steps.sort_by_key(|step| step.priority);
        steps
    }

    /// Declared step with the given id.
    #[must_use]
    pub fn step(&self, id: StepId) -> Option<&StepDefinition> {
        self.steps.iter().find(|step| step.id == id)
    }
}

/// Step-by-step builder for [`AutomationDefinition`].
#[derive(Debug, Default)]
pub struct AutomationBuilder {
    id: Option<AutomationId>,
    name: Option<String>,
    enabled: Option<bool>,
    trigger: Option<TriggerSpec>,
    conditions: Option<ConditionExpr>,
    schedule: Option<ScheduleSpec>,
    steps: Vec<StepDefinition>,
}

impl AutomationBuilder {
    #[must_use]
    pub fn id(mut self, id: AutomationId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    #[must_use]
    pub fn trigger(mut self, trigger: TriggerSpec) -> Self {
        self.trigger = Some(trigger);
        self
    }

    #[must_use]
    pub fn conditions(mut self, conditions: ConditionExpr) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Without a trigger, a scheduled automation gets the
    /// [`SCHEDULED_TRIGGER`].
    #[must_use]
    pub fn schedule(mut self, schedule: ScheduleSpec) -> Self {
        self.schedule = Some(schedule);
        self
    }

    #[must_use]
    pub fn step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    /// Consume the builder, validate, and return an [`AutomationDefinition`].
    ///
    /// # Errors
    ///
    /// Returns [`KeywardError::Validation`] if neither a trigger nor a
    /// schedule is set, or any invariant checked by
    /// [`AutomationDefinition::validate`] fails.
    pub fn build(self) -> Result<AutomationDefinition, KeywardError> {
        let trigger = match (self.trigger, &self.schedule) {
            (Some(trigger), _) => trigger,
            (None, Some(_)) => TriggerSpec::new(SCHEDULED_TRIGGER),
            (None, None) => return Err(ValidationError::MissingTrigger.into()),
        };
        let automation = AutomationDefinition {
            id: self.id.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            enabled: self.enabled.unwrap_or(true),
            trigger,
            conditions: self.conditions,
            schedule: self.schedule,
            steps: self.steps,
        };
        automation.validate()?;
        Ok(automation)
    }
}
