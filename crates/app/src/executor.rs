//! Step executor: applies steps to a freshly loaded resource.
//!
//! Every step loads the user, applies its change and saves it, so a failed
//! step leaves the changes of earlier steps in place and does not stop
//! later ones. A save that lost a race with another writer is retried on a
//! fresh copy of the user.

use std::sync::Arc;

use keyward_domain::automation::StepDefinition;
use keyward_domain::error::KeywardError;
use keyward_domain::id::{AutomationId, StepId};
use keyward_domain::outcome::Outcome;

use crate::ports::UserStore;
use crate::providers::ProviderRegistry;

/// Attempts at load, apply and save before a version conflict is returned.
const MAX_ATTEMPTS: u32 = 5;

/// What an inline run of several steps did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StepRunReport {
    pub applied: Vec<StepId>,
    pub failed: Vec<StepId>,
    /// Steps not applied because the resource no longer exists.
    pub missing: Vec<StepId>,
}

pub struct StepExecutor<US> {
    users: US,
    providers: Arc<ProviderRegistry>,
}

impl<US: UserStore> StepExecutor<US> {
    /// Apply steps to users of `users`, resolving step kinds in `providers`.
    pub fn new(users: US, providers: Arc<ProviderRegistry>) -> Self {
        Self { users, providers }
    }

    /// The store steps load users from and save them to.
    #[must_use]
    pub fn users(&self) -> &US {
        &self.users
    }

    /// Apply `step` to the user `resource_id`.
    ///
    /// Returns [`Outcome::NotFound`] when the user no longer exists. When
    /// the user changes between load and save, the step is applied again on
    /// the newer copy.
    ///
    /// # Errors
    ///
    /// Returns [`KeywardError::ProviderNotFound`] for an unknown step kind,
    /// [`KeywardError::Step`] when the step cannot be applied,
    /// [`KeywardError::Conflict`] when every attempt lost a race, or a
    /// storage error.
    #[tracing::instrument(skip(self, step), fields(step_id = %step.id, provider_id = %step.provider_id))]
    pub async fn execute(
        &self,
        automation_id: AutomationId,
        step: &StepDefinition,
        resource_id: &str,
    ) -> Result<Outcome<()>, KeywardError> {
        let provider = self.providers.step_provider(&step.provider_id)?;
        let mut attempt = 1;
        loop {
            let Some(mut user) = self.users.get_by_id(resource_id).await? else {
                tracing::debug!("resource no longer exists");
                return Ok(Outcome::NotFound);
            };
            provider.run(&mut user, &step.config)?;
            match self.users.update(user).await {
                Ok(_) => break,
                Err(KeywardError::NotFound(_)) => {
                    tracing::debug!("resource deleted while the step ran");
                    return Ok(Outcome::NotFound);
                }
                Err(KeywardError::Conflict(err)) if attempt < MAX_ATTEMPTS => {
                    tracing::debug!(attempt, error = %err, "resource changed concurrently, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
        tracing::info!("step applied");
        Ok(Outcome::Executed(()))
    }

    /// Apply `steps` in the given order. Step failures are logged and
    /// recorded in the report; the remaining steps still run.
    ///
    /// # Errors
    ///
    /// Returns [`KeywardError::ProviderNotFound`] as soon as a step names an
    /// unknown kind.
    pub async fn run_all(
        &self,
        automation_id: AutomationId,
        steps: &[&StepDefinition],
        resource_id: &str,
    ) -> Result<StepRunReport, KeywardError> {
        let mut report = StepRunReport::default();
        for step in steps {
            match self.execute(automation_id, step, resource_id).await {
                Ok(Outcome::Executed(())) => report.applied.push(step.id),
                Ok(_) => report.missing.push(step.id),
                Err(err @ KeywardError::ProviderNotFound(_)) => return Err(err),
                Err(err) => {
                    tracing::error!(
                        %automation_id,
                        step_id = %step.id,
                        %resource_id,
                        error = %err,
                        "step failed"
                    );
                    report.failed.push(step.id);
                }
            }
        }
        Ok(report)
    }
}
