//! Automation service: use-cases for managing automations.
//!
//! Every change is applied to this node's timers right away and then
//! announced on the cluster channel so the other nodes follow.

use keyward_domain::automation::AutomationDefinition;
use keyward_domain::cluster::{ClusterEvent, ClusterMessage};
use keyward_domain::error::{KeywardError, NotFoundError};
use keyward_domain::id::AutomationId;
use keyward_domain::outcome::Outcome;

use crate::automation_engine::AutomationEngine;
use crate::executor::StepRunReport;
use crate::ports::{
    AutomationRepository, ClusterNotifier, LeaseStore, ScheduledStepStore, UserStore,
};

/// Manages stored automations and keeps every node's timers in step with
/// them.
pub struct AutomationService<AR, US, SS, LS, CN> {
    engine: AutomationEngine<AR, US, SS, LS>,
    notifier: CN,
}

impl<AR, US, SS, LS, CN> AutomationService<AR, US, SS, LS, CN>
where
    AR: AutomationRepository + Send + Sync + 'static,
    US: UserStore + Send + Sync + 'static,
    SS: ScheduledStepStore + Send + Sync + 'static,
    LS: LeaseStore + Send + Sync + 'static,
    CN: ClusterNotifier,
{
    /// Wrap `engine`, announcing changes through `notifier`.
    pub fn new(engine: AutomationEngine<AR, US, SS, LS>, notifier: CN) -> Self {
        Self { engine, notifier }
    }

    fn repo(&self) -> &AR {
        self.engine.registry().repo()
    }

    fn validate(&self, automation: &AutomationDefinition) -> Result<(), KeywardError> {
        self.engine
            .registry()
            .matcher()
            .providers()
            .validate_automation(automation)
    }

    /// Store `automation` once its trigger, condition and step kinds resolve
    /// to registered providers, arm its schedule if it has one, then tell
    /// the cluster about it.
    ///
    /// # Errors
    ///
    /// Returns [`KeywardError::Validation`] for a malformed definition,
    /// [`KeywardError::ProviderNotFound`] when a trigger, condition or step
    /// kind is not registered on this node, or a storage error.
    #[tracing::instrument(skip(self, automation), fields(automation_name = %automation.name))]
    pub async fn create_automation(
        &self,
        automation: AutomationDefinition,
    ) -> Result<AutomationDefinition, KeywardError> {
        self.validate(&automation)?;
        let created = self.repo().create(automation).await?;
        self.engine.reschedule_automation(created.id).await?;
        self.announce(created.id, false).await;
        Ok(created)
    }

    /// The stored definition of automation `id`.
    ///
    /// # Errors
    ///
    /// Returns [`KeywardError::NotFound`] for an unknown id, or a storage
    /// error.
    #[tracing::instrument(skip(self))]
    pub async fn get_automation(
        &self,
        id: AutomationId,
    ) -> Result<AutomationDefinition, KeywardError> {
        self.repo().get_by_id(id).await?.ok_or_else(|| {
            NotFoundError {
                entity: "Automation",
                id: id.to_string(),
            }
            .into()
        })
    }

    /// Every stored automation, enabled or paused.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn list_automations(&self) -> Result<Vec<AutomationDefinition>, KeywardError> {
        self.repo().get_all().await
    }

    /// Replace an existing automation and rearm its pending steps.
    ///
    /// Pending steps of a disabled automation stay persisted and fire again
    /// once it is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`KeywardError::NotFound`] for an unknown id, the validation
    /// errors of [`create_automation`](Self::create_automation), or a
    /// storage error.
    #[tracing::instrument(skip(self, automation), fields(automation_id = %automation.id))]
    pub async fn update_automation(
        &self,
        automation: AutomationDefinition,
    ) -> Result<AutomationDefinition, KeywardError> {
        self.validate(&automation)?;
        self.get_automation(automation.id).await?;
        let updated = self.repo().update(automation).await?;
        self.engine.reschedule_automation(updated.id).await?;
        self.announce(updated.id, false).await;
        Ok(updated)
    }

    /// Pause or resume an automation.
    ///
    /// # Errors
    ///
    /// Same as [`update_automation`](Self::update_automation).
    pub async fn set_enabled(
        &self,
        id: AutomationId,
        enabled: bool,
    ) -> Result<AutomationDefinition, KeywardError> {
        let mut automation = self.get_automation(id).await?;
        automation.enabled = enabled;
        self.update_automation(automation).await
    }

    /// Delete an automation and every step it still has pending.
    ///
    /// # Errors
    ///
    /// Returns [`KeywardError::NotFound`] for an unknown id or a storage
    /// error.
    #[tracing::instrument(skip(self))]
    pub async fn delete_automation(&self, id: AutomationId) -> Result<(), KeywardError> {
        self.get_automation(id).await?;
        self.repo().delete(id).await?;
        let discarded = self.engine.discard_automation(id).await?;
        tracing::info!(discarded, "automation deleted");
        self.announce(id, true).await;
        Ok(())
    }

    /// Run the steps of `id` against `resource_id` without a triggering
    /// event.
    ///
    /// # Errors
    ///
    /// See [`AutomationEngine::run_ad_hoc`].
    pub async fn run_automation(
        &self,
        id: AutomationId,
        resource_id: &str,
    ) -> Result<Outcome<StepRunReport>, KeywardError> {
        self.engine.run_ad_hoc(id, resource_id).await
    }

    async fn announce(&self, automation_id: AutomationId, removed: bool) {
        let message = ClusterMessage::new(
            self.engine.node_id(),
            ClusterEvent::AutomationChanged {
                automation_id,
                removed,
            },
        );
        if let Err(err) = self.notifier.notify(message).await {
            tracing::warn!(%automation_id, error = %err, "failed to notify the cluster");
        }
    }
}
