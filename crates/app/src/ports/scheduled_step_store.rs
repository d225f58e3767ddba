//! Scheduled step store port: delayed steps that survive restarts, and which
//! resources each automation was activated for.

use std::future::Future;
use std::sync::Arc;

use keyward_domain::error::KeywardError;
use keyward_domain::id::AutomationId;
use keyward_domain::schedule::ScheduledStep;
use keyward_domain::time::Timestamp;

/// Shared record of every delayed step that has not run yet.
pub trait ScheduledStepStore {
    /// Insert or replace the record with the same key.
    fn upsert(
        &self,
        step: ScheduledStep,
    ) -> impl Future<Output = Result<ScheduledStep, KeywardError>> + Send;

    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<ScheduledStep>, KeywardError>> + Send;

    /// Returns `false` if no record existed.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool, KeywardError>> + Send;

    /// Records due at or before `now`, oldest first.
    fn get_due(
        &self,
        now: Timestamp,
    ) -> impl Future<Output = Result<Vec<ScheduledStep>, KeywardError>> + Send;

    fn get_all(&self) -> impl Future<Output = Result<Vec<ScheduledStep>, KeywardError>> + Send;

    fn get_by_automation(
        &self,
        automation_id: AutomationId,
    ) -> impl Future<Output = Result<Vec<ScheduledStep>, KeywardError>> + Send;

    /// Drop the pending steps and activation records of `automation_id`.
    /// Returns how many pending steps were removed.
    fn delete_by_automation(
        &self,
        automation_id: AutomationId,
    ) -> impl Future<Output = Result<u64, KeywardError>> + Send;

    /// Record that `automation_id` was activated for `resource_id`.
    /// Returns `false` if it already was, on any node.
    fn mark_activated(
        &self,
        automation_id: AutomationId,
        resource_id: &str,
        at: Timestamp,
    ) -> impl Future<Output = Result<bool, KeywardError>> + Send;
}

impl<T: ScheduledStepStore + Send + Sync> ScheduledStepStore for Arc<T> {
    fn upsert(
        &self,
        step: ScheduledStep,
    ) -> impl Future<Output = Result<ScheduledStep, KeywardError>> + Send {
        (**self).upsert(step)
    }

    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<ScheduledStep>, KeywardError>> + Send {
        (**self).get(key)
    }

    fn delete(&self, key: &str) -> impl Future<Output = Result<bool, KeywardError>> + Send {
        (**self).delete(key)
    }

    fn get_due(
        &self,
        now: Timestamp,
    ) -> impl Future<Output = Result<Vec<ScheduledStep>, KeywardError>> + Send {
        (**self).get_due(now)
    }

    fn get_all(&self) -> impl Future<Output = Result<Vec<ScheduledStep>, KeywardError>> + Send {
        (**self).get_all()
    }

    fn get_by_automation(
        &self,
        automation_id: AutomationId,
    ) -> impl Future<Output = Result<Vec<ScheduledStep>, KeywardError>> + Send {
        (**self).get_by_automation(automation_id)
    }

    fn delete_by_automation(
        &self,
        automation_id: AutomationId,
    ) -> impl Future<Output = Result<u64, KeywardError>> + Send {
        (**self).delete_by_automation(automation_id)
    }

    fn mark_activated(
        &self,
        automation_id: AutomationId,
        resource_id: &str,
        at: Timestamp,
    ) -> impl Future<Output = Result<bool, KeywardError>> + Send {
        (**self).mark_activated(automation_id, resource_id, at)
    }
}
