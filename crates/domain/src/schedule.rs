//! Scheduled work: local timer descriptions and persisted delayed steps.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::id::{AutomationId, StepId};
use crate::time::{Timestamp, add_duration};

/// A timer registered on one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub task_key: String,
    pub due_at: Timestamp,
    /// `None` for one-shot timers.
    pub period: Option<Duration>,
}

/// A delayed step waiting for its due time, shared by every node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledStep {
    pub key: String,
    pub automation_id: AutomationId,
    pub step_id: StepId,
    pub resource_id: String,
    pub triggered_at: Timestamp,
    pub due_at: Timestamp,
}

impl ScheduledStep {
    /// Record that `step_id` must run `after` its automation was triggered.
    #[must_use]
    pub fn new(
        automation_id: AutomationId,
        step_id: StepId,
        resource_id: impl Into<String>,
        triggered_at: Timestamp,
        after: Duration,
    ) -> Self {
        let resource_id = resource_id.into();
        Self {
            key: Self::key_for(automation_id, &resource_id, step_id),
            automation_id,
            step_id,
            resource_id,
            triggered_at,
            due_at: add_duration(triggered_at, after),
        }
    }

    /// One key per automation, resource and step: triggering again for the
    /// same resource replaces the pending step.
    #[must_use]
    pub fn key_for(automation_id: AutomationId, resource_id: &str, step_id: StepId) -> String {
        format!("{automation_id}:{resource_id}:{step_id}")
    }

    #[must_use]
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.due_at <= now
    }
}
