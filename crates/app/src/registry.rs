//! Automation registry: configured automations and which of them an event
//! activates.

use keyward_domain::automation::AutomationDefinition;
use keyward_domain::error::KeywardError;
use keyward_domain::event::AutomationEvent;
use keyward_domain::id::AutomationId;

use crate::matcher::EventMatcher;
use crate::ports::AutomationRepository;

/// Read side of the automation configuration.
pub struct AutomationRegistry<AR> {
    repo: AR,
    matcher: EventMatcher,
}

impl<AR: AutomationRepository> AutomationRegistry<AR> {
    /// Read automations from `repo` and evaluate their triggers with `matcher`.
    pub fn new(repo: AR, matcher: EventMatcher) -> Self {
        Self { repo, matcher }
    }

    /// Trigger evaluation shared with the engine.
    #[must_use]
    pub fn matcher(&self) -> &EventMatcher {
        &self.matcher
    }

    /// Underlying automation storage.
    #[must_use]
    pub fn repo(&self) -> &AR {
        &self.repo
    }

    /// # Errors
    ///
    /// Returns a storage error from the repository.
    pub async fn get(&self, id: AutomationId) -> Result<Option<AutomationDefinition>, KeywardError> {
        self.repo.get_by_id(id).await
    }

    /// # Errors
    ///
    /// Returns a storage error from the repository.
    pub async fn all(&self) -> Result<Vec<AutomationDefinition>, KeywardError> {
        self.repo.get_all().await
    }

    /// Enabled automations whose trigger `event` activates.
    ///
    /// An automation whose trigger cannot be evaluated is logged and left
    /// out; the others still match.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the repository.
    pub async fn matching(
        &self,
        event: &AutomationEvent,
    ) -> Result<Vec<AutomationDefinition>, KeywardError> {
        let mut matched = Vec::new();
        for automation in self.repo.get_enabled().await? {
            match self.matcher.matches(&automation.trigger, event) {
                Ok(true) => matched.push(automation),
                Ok(false) => {}
                Err(err) => tracing::error!(
                    automation_id = %automation.id,
                    name = %automation.name,
                    error = %err,
                    "cannot evaluate automation trigger, skipping"
                ),
            }
        }
        matched.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(matched)
    }
}
