//! Event matching: raw domain events to [`AutomationEvent`]s, automation
//! events to triggers, and users to activation conditions.
//!
//! Matching is synchronous and never touches storage. A raw event no
//! provider supports, or whose resource id cannot be resolved, is dropped.

use std::sync::Arc;

use keyward_domain::automation::{ConditionCheck, ConditionExpr, SCHEDULED_TRIGGER, TriggerSpec};
use keyward_domain::error::KeywardError;
use keyward_domain::event::{AutomationEvent, DomainEvent, ResourceType, RoleRef};
use keyward_domain::time::Timestamp;
use keyward_domain::user::{User, normalize_group_path};

use crate::providers::ProviderRegistry;

/// A trigger kind, looked up by the `provider_id` of a [`TriggerSpec`].
pub trait EventProvider: Send + Sync {
    fn id(&self) -> &'static str;

    fn resource_type(&self) -> ResourceType {
        ResourceType::Users
    }

    /// Whether `raw` is an event of this kind.
    fn supports(&self, raw: &DomainEvent) -> bool;

    /// Id of the resource `raw` is about, if it can be determined.
    fn resolve_resource_id(&self, raw: &DomainEvent) -> Option<String> {
        let id = raw.user_id().trim();
        (!id.is_empty()).then(|| id.to_string())
    }

    /// Whether the trigger parameter accepts the event's specific field.
    /// Only called for events this provider supports.
    fn accepts(&self, parameter: &str, raw: &DomainEvent) -> bool;

    /// Whether the condition that triggered the automation still holds for
    /// `user`, re-checked before a delayed step runs.
    fn still_holds(&self, _parameter: Option<&str>, _user: &User) -> bool {
        true
    }

    /// Build the automation event for `raw`, or `None` to drop it.
    fn create(&self, raw: &DomainEvent, occurred_at: Timestamp) -> Option<AutomationEvent> {
        if !self.supports(raw) {
            return None;
        }
        let resource_id = self.resolve_resource_id(raw)?;
        AutomationEvent::from_domain(
            self.resource_type(),
            resource_id,
            self.id(),
            raw.clone(),
            occurred_at,
        )
        .ok()
    }

    /// Whether `event` activates a trigger of this kind narrowed by
    /// `parameter`. Without a parameter every event of the kind matches.
    fn evaluate(&self, parameter: Option<&str>, event: &AutomationEvent) -> bool {
        if event.provider_id != self.id() {
            return false;
        }
        match (parameter, event.domain_event()) {
            (None, _) => true,
            (Some(parameter), Some(raw)) => self.supports(raw) && self.accepts(parameter, raw),
            (Some(_), None) => false,
        }
    }
}

pub struct UserCreated;

impl EventProvider for UserCreated {
    fn id(&self) -> &'static str {
        "user-created"
    }

    fn supports(&self, raw: &DomainEvent) -> bool {
        matches!(raw, DomainEvent::UserCreated { .. })
    }

    fn accepts(&self, _parameter: &str, _raw: &DomainEvent) -> bool {
        true
    }
}

/// Narrowed by client id.
pub struct UserLoggedIn;

impl EventProvider for UserLoggedIn {
    fn id(&self) -> &'static str {
        "user-logged-in"
    }

    fn supports(&self, raw: &DomainEvent) -> bool {
        matches!(raw, DomainEvent::UserLoggedIn { .. })
    }

    fn accepts(&self, parameter: &str, raw: &DomainEvent) -> bool {
        matches!(raw, DomainEvent::UserLoggedIn { client_id, .. } if client_id == parameter)
    }
}

fn same_role(parameter: &str, role: &RoleRef) -> bool {
    parameter
        .parse::<RoleRef>()
        .is_ok_and(|expected| &expected == role)
}

fn parameter_role(parameter: Option<&str>) -> Option<RoleRef> {
    parameter.and_then(|parameter| parameter.parse().ok())
}

/// Narrowed by role, `name` or `client/name`.
pub struct UserRoleGranted;

impl EventProvider for UserRoleGranted {
    fn id(&self) -> &'static str {
        "user-role-granted"
    }

    fn supports(&self, raw: &DomainEvent) -> bool {
        matches!(raw, DomainEvent::RoleGranted { .. })
    }

    fn accepts(&self, parameter: &str, raw: &DomainEvent) -> bool {
        matches!(raw, DomainEvent::RoleGranted { role, .. } if same_role(parameter, role))
    }

    fn still_holds(&self, parameter: Option<&str>, user: &User) -> bool {
        parameter_role(parameter).is_none_or(|role| user.has_role(&role))
    }
}

pub struct UserRoleRevoked;

impl EventProvider for UserRoleRevoked {
    fn id(&self) -> &'static str {
        "user-role-revoked"
    }

    fn supports(&self, raw: &DomainEvent) -> bool {
        matches!(raw, DomainEvent::RoleRevoked { .. })
    }

    fn accepts(&self, parameter: &str, raw: &DomainEvent) -> bool {
        matches!(raw, DomainEvent::RoleRevoked { role, .. } if same_role(parameter, role))
    }

    fn still_holds(&self, parameter: Option<&str>, user: &User) -> bool {
        parameter_role(parameter).is_none_or(|role| !user.has_role(&role))
    }
}

/// Narrowed by group path; `sales` and `/sales` are the same group.
pub struct UserGroupMembershipAdded;

impl EventProvider for UserGroupMembershipAdded {
    fn id(&self) -> &'static str {
        "user-group-membership-added"
    }

    fn supports(&self, raw: &DomainEvent) -> bool {
        matches!(raw, DomainEvent::GroupMembershipAdded { .. })
    }

    fn accepts(&self, parameter: &str, raw: &DomainEvent) -> bool {
        matches!(
            raw,
            DomainEvent::GroupMembershipAdded { group_path, .. }
                if normalize_group_path(group_path) == normalize_group_path(parameter)
        )
    }

    fn still_holds(&self, parameter: Option<&str>, user: &User) -> bool {
        parameter.is_none_or(|path| user.is_member_of(path))
    }
}

pub struct UserGroupMembershipRemoved;

impl EventProvider for UserGroupMembershipRemoved {
    fn id(&self) -> &'static str {
        "user-group-membership-removed"
    }

    fn supports(&self, raw: &DomainEvent) -> bool {
        matches!(raw, DomainEvent::GroupMembershipRemoved { .. })
    }

    fn accepts(&self, parameter: &str, raw: &DomainEvent) -> bool {
        matches!(
            raw,
            DomainEvent::GroupMembershipRemoved { group_path, .. }
                if normalize_group_path(group_path) == normalize_group_path(parameter)
        )
    }

    fn still_holds(&self, parameter: Option<&str>, user: &User) -> bool {
        parameter.is_none_or(|path| !user.is_member_of(path))
    }
}

/// Narrowed by identity provider alias.
pub struct UserFederatedIdentityAdded;

impl EventProvider for UserFederatedIdentityAdded {
    fn id(&self) -> &'static str {
        "user-federated-identity-added"
    }

    fn supports(&self, raw: &DomainEvent) -> bool {
        matches!(raw, DomainEvent::FederatedIdentityAdded { .. })
    }

    fn accepts(&self, parameter: &str, raw: &DomainEvent) -> bool {
        matches!(
            raw,
            DomainEvent::FederatedIdentityAdded { identity_provider, .. } if identity_provider == parameter
        )
    }

    fn still_holds(&self, parameter: Option<&str>, user: &User) -> bool {
        parameter.is_none_or(|alias| user.is_linked_to(alias))
    }
}

pub struct UserFederatedIdentityRemoved;

impl EventProvider for UserFederatedIdentityRemoved {
    fn id(&self) -> &'static str {
        "user-federated-identity-removed"
    }

    fn supports(&self, raw: &DomainEvent) -> bool {
        matches!(raw, DomainEvent::FederatedIdentityRemoved { .. })
    }

    fn accepts(&self, parameter: &str, raw: &DomainEvent) -> bool {
        matches!(
            raw,
            DomainEvent::FederatedIdentityRemoved { identity_provider, .. } if identity_provider == parameter
        )
    }

    fn still_holds(&self, parameter: Option<&str>, user: &User) -> bool {
        parameter.is_none_or(|alias| !user.is_linked_to(alias))
    }
}

/// Trigger of scheduled automations. Matches no event, the schedule sweep
/// activates them instead.
pub struct Scheduled;

impl EventProvider for Scheduled {
    fn id(&self) -> &'static str {
        SCHEDULED_TRIGGER
    }

    fn supports(&self, _raw: &DomainEvent) -> bool {
        false
    }

    fn accepts(&self, _parameter: &str, _raw: &DomainEvent) -> bool {
        false
    }
}

/// A condition kind, looked up by the `provider_id` of a [`ConditionCheck`].
pub trait ConditionProvider: Send + Sync {
    fn id(&self) -> &'static str;

    /// Reject a parameter this condition cannot be evaluated with.
    ///
    /// # Errors
    ///
    /// Returns the reason the parameter is unusable.
    fn validate(&self, parameter: Option<&str>) -> Result<(), &'static str>;

    fn evaluate(&self, parameter: Option<&str>, user: &User) -> bool;
}

fn required(parameter: Option<&str>) -> Result<(), &'static str> {
    match parameter {
        Some(value) if !value.trim().is_empty() => Ok(()),
        _ => Err("a parameter is required"),
    }
}

/// Holds when the user belongs to the group given as parameter.
pub struct IsMemberOf;

impl ConditionProvider for IsMemberOf {
    fn id(&self) -> &'static str {
        "is-member-of"
    }

    fn validate(&self, parameter: Option<&str>) -> Result<(), &'static str> {
        required(parameter)
    }

    fn evaluate(&self, parameter: Option<&str>, user: &User) -> bool {
        parameter.is_some_and(|path| user.is_member_of(path))
    }
}

/// Holds when the user is linked to the identity provider given as
/// parameter, or to any identity provider without one.
pub struct HasIdentityProviderLink;

impl ConditionProvider for HasIdentityProviderLink {
    fn id(&self) -> &'static str {
        "has-identity-provider-link"
    }

    fn validate(&self, _parameter: Option<&str>) -> Result<(), &'static str> {
        Ok(())
    }

    fn evaluate(&self, parameter: Option<&str>, user: &User) -> bool {
        match parameter {
            Some(alias) => user.is_linked_to(alias),
            None => !user.federated_identities.is_empty(),
        }
    }
}

/// Front door of the matching layer.
#[derive(Clone)]
pub struct EventMatcher {
    providers: Arc<ProviderRegistry>,
}

impl EventMatcher {
    #[must_use]
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self { providers }
    }

    /// Event, step and directory implementations known to this node.
    #[must_use]
    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Normalize `raw` with the first provider that supports it.
    #[must_use]
    pub fn create(&self, raw: &DomainEvent, occurred_at: Timestamp) -> Option<AutomationEvent> {
        let event = self
            .providers
            .event_providers()
            .find_map(|provider| provider.create(raw, occurred_at));
        if event.is_none() {
            tracing::debug!(event = %raw, "no automation event for raw event");
        }
        event
    }

    /// Whether `event` activates `trigger`.
    ///
    /// # Errors
    ///
    /// Returns [`KeywardError::ProviderNotFound`] when no event provider is
    /// registered for the trigger.
    pub fn matches(
        &self,
        trigger: &TriggerSpec,
        event: &AutomationEvent,
    ) -> Result<bool, KeywardError> {
        let provider = self.providers.event_provider(&trigger.provider_id)?;
        Ok(provider.evaluate(trigger.parameter(), event))
    }

    /// Whether the trigger condition still holds for `user`.
    ///
    /// # Errors
    ///
    /// Returns [`KeywardError::ProviderNotFound`] when no event provider is
    /// registered for the trigger.
    pub fn still_holds(&self, trigger: &TriggerSpec, user: &User) -> Result<bool, KeywardError> {
        let provider = self.providers.event_provider(&trigger.provider_id)?;
        Ok(provider.still_holds(trigger.parameter(), user))
    }

    /// Whether `user` satisfies the activation conditions. No conditions
    /// always hold.
    ///
    /// # Errors
    ///
    /// Returns [`KeywardError::ProviderNotFound`] when a check names an
    /// unknown condition provider.
    pub fn conditions_hold(
        &self,
        conditions: Option<&ConditionExpr>,
        user: &User,
    ) -> Result<bool, KeywardError> {
        let Some(conditions) = conditions else {
            return Ok(true);
        };
        conditions.evaluate(&mut |check: &ConditionCheck| {
            let provider = self.providers.condition_provider(&check.provider_id)?;
            Ok(provider.evaluate(check.parameter(), user))
        })
    }
}
