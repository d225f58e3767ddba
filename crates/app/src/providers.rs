//! Explicit provider registry handed to every component at construction.
//!
//! Lookups by an unknown id fail with [`KeywardError::ProviderNotFound`],
//! a configuration error callers report instead of swallowing.

use std::collections::BTreeMap;
use std::sync::Arc;

use keyward_domain::automation::{AutomationDefinition, ConditionExpr};
use keyward_domain::error::{KeywardError, ProviderKind, ProviderNotFoundError, ValidationError};

use crate::matcher::{self, ConditionProvider, EventProvider};
use crate::ports::DirectoryProvider;
use crate::steps::{self, StepProvider};

/// Event, condition, step and directory providers keyed by id.
#[derive(Default)]
pub struct ProviderRegistry {
    events: BTreeMap<&'static str, Arc<dyn EventProvider>>,
    conditions: BTreeMap<&'static str, Arc<dyn ConditionProvider>>,
    steps: BTreeMap<&'static str, Arc<dyn StepProvider>>,
    directories: BTreeMap<String, Arc<dyn DirectoryProvider>>,
}

impl ProviderRegistry {
    /// Registry with every built-in trigger, condition and step kind, and no
    /// directory.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry
            .register_event(matcher::UserCreated)
            .register_event(matcher::UserLoggedIn)
            .register_event(matcher::UserRoleGranted)
            .register_event(matcher::UserRoleRevoked)
            .register_event(matcher::UserGroupMembershipAdded)
            .register_event(matcher::UserGroupMembershipRemoved)
            .register_event(matcher::UserFederatedIdentityAdded)
            .register_event(matcher::UserFederatedIdentityRemoved)
            .register_event(matcher::Scheduled);
        registry
            .register_condition(matcher::IsMemberOf)
            .register_condition(matcher::HasIdentityProviderLink);
        registry
            .register_step(steps::SetAttribute)
            .register_step(steps::RemoveAttribute)
            .register_step(steps::JoinGroup)
            .register_step(steps::LeaveGroup)
            .register_step(steps::GrantRole)
            .register_step(steps::RevokeRole)
            .register_step(steps::AddRequiredAction)
            .register_step(steps::RemoveRequiredAction)
            .register_step(steps::DisableUser);
        registry
    }

    /// Add or replace the trigger kind with the same id.
    pub fn register_event(&mut self, provider: impl EventProvider + 'static) -> &mut Self {
        self.events.insert(provider.id(), Arc::new(provider));
        self
    }

    pub fn register_condition(&mut self, provider: impl ConditionProvider + 'static) -> &mut Self {
        self.conditions.insert(provider.id(), Arc::new(provider));
        self
    }

    pub fn register_step(&mut self, provider: impl StepProvider + 'static) -> &mut Self {
        self.steps.insert(provider.id(), Arc::new(provider));
        self
    }

    pub fn register_directory(&mut self, provider: Arc<dyn DirectoryProvider>) -> &mut Self {
        self.directories.insert(provider.id().to_string(), provider);
        self
    }

    /// Event providers in id order.
    pub fn event_providers(&self) -> impl Iterator<Item = &dyn EventProvider> {
        self.events.values().map(AsRef::as_ref)
    }

    /// # Errors
    ///
    /// Returns [`KeywardError::ProviderNotFound`] for an unknown id.
    pub fn event_provider(&self, id: &str) -> Result<&dyn EventProvider, KeywardError> {
        self.events
            .get(id)
            .map(AsRef::as_ref)
            .ok_or_else(|| not_found(ProviderKind::Event, id))
    }

    /// # Errors
    ///
    /// Returns [`KeywardError::ProviderNotFound`] for an unknown id.
    pub fn condition_provider(&self, id: &str) -> Result<&dyn ConditionProvider, KeywardError> {
        self.conditions
            .get(id)
            .map(AsRef::as_ref)
            .ok_or_else(|| not_found(ProviderKind::Condition, id))
    }

    /// # Errors
    ///
    /// Returns [`KeywardError::ProviderNotFound`] for an unknown id.
    pub fn step_provider(&self, id: &str) -> Result<&dyn StepProvider, KeywardError> {
        self.steps
            .get(id)
            .map(AsRef::as_ref)
            .ok_or_else(|| not_found(ProviderKind::Step, id))
    }

    /// # Errors
    ///
    /// Returns [`KeywardError::ProviderNotFound`] for an unknown id.
    pub fn directory(&self, kind: &str) -> Result<Arc<dyn DirectoryProvider>, KeywardError> {
        self.directories
            .get(kind)
            .cloned()
            .ok_or_else(|| not_found(ProviderKind::Directory, kind))
    }

    /// Validate `automation` and check that every provider it names exists
    /// and accepts its configuration.
    ///
    /// # Errors
    ///
    /// Returns [`KeywardError::Validation`] for invalid definitions, step
    /// configurations or condition parameters, and
    /// [`KeywardError::ProviderNotFound`] for unknown ids.
    pub fn validate_automation(&self, automation: &AutomationDefinition) -> Result<(), KeywardError> {
        automation.validate()?;
        self.event_provider(&automation.trigger.provider_id)?;
        let checks = automation
            .conditions
            .as_ref()
            .map(ConditionExpr::checks)
            .unwrap_or_default();
        for check in checks {
            let provider = self.condition_provider(&check.provider_id)?;
            provider
                .validate(check.parameter())
                .map_err(|reason| ValidationError::InvalidConditionConfig {
                    provider_id: check.provider_id.clone(),
                    reason: reason.to_string(),
                })?;
        }
        for step in &automation.steps {
            let provider = self.step_provider(&step.provider_id)?;
            provider
                .validate(&step.config)
                .map_err(|err| ValidationError::InvalidStepConfig {
                    provider_id: step.provider_id.clone(),
                    reason: err.to_string(),
                })?;
        }
        Ok(())
    }
}

fn not_found(kind: ProviderKind, id: &str) -> KeywardError {
    ProviderNotFoundError {
        kind,
        id: id.to_string(),
    }
    .into()
}
