//! Automation repository port: persistence for automations.

use std::future::Future;
use std::sync::Arc;

use keyward_domain::automation::AutomationDefinition;
use keyward_domain::error::KeywardError;
use keyward_domain::id::AutomationId;

/// Repository for persisting and querying [`AutomationDefinition`]s.
pub trait AutomationRepository {
    /// Create a new automation in storage.
    fn create(
        &self,
        automation: AutomationDefinition,
    ) -> impl Future<Output = Result<AutomationDefinition, KeywardError>> + Send;

    /// Get an automation by its unique identifier.
    fn get_by_id(
        &self,
        id: AutomationId,
    ) -> impl Future<Output = Result<Option<AutomationDefinition>, KeywardError>> + Send;

    /// Get all automations.
    fn get_all(
        &self,
    ) -> impl Future<Output = Result<Vec<AutomationDefinition>, KeywardError>> + Send;

    /// Get all enabled automations.
    fn get_enabled(
        &self,
    ) -> impl Future<Output = Result<Vec<AutomationDefinition>, KeywardError>> + Send;

    /// Update an existing automation.
    fn update(
        &self,
        automation: AutomationDefinition,
    ) -> impl Future<Output = Result<AutomationDefinition, KeywardError>> + Send;

    /// Delete an automation by its unique identifier.
    fn delete(&self, id: AutomationId) -> impl Future<Output = Result<(), KeywardError>> + Send;
}

impl<T: AutomationRepository + Send + Sync> AutomationRepository for Arc<T> {
    fn create(
        &self,
        automation: AutomationDefinition,
    ) -> impl Future<Output = Result<AutomationDefinition, KeywardError>> + Send {
        (**self).create(automation)
    }

    fn get_by_id(
        &self,
        id: AutomationId,
    ) -> impl Future<Output = Result<Option<AutomationDefinition>, KeywardError>> + Send {
        (**self).get_by_id(id)
    }

    fn get_all(
        &self,
    ) -> impl Future<Output = Result<Vec<AutomationDefinition>, KeywardError>> + Send {
        (**self).get_all()
    }

    fn get_enabled(
        &self,
    ) -> impl Future<Output = Result<Vec<AutomationDefinition>, KeywardError>> + Send {
        (**self).get_enabled()
    }

    fn update(
        &self,
        automation: AutomationDefinition,
    ) -> impl Future<Output = Result<AutomationDefinition, KeywardError>> + Send {
        (**self).update(automation)
    }

    fn delete(&self, id: AutomationId) -> impl Future<Output = Result<(), KeywardError>> + Send {
        (**self).delete(id)
    }
}
