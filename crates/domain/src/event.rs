//! Events: raw domain events from the host server and their normalized
//! automation form.
//!
//! The host delivers a [`DomainEvent`] for every user-facing change. An event
//! provider turns the ones it understands into an [`AutomationEvent`] keyed by
//! the affected resource.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::time::Timestamp;

/// Provider id carried by events created for ad-hoc automation runs.
pub const AD_HOC_PROVIDER_ID: &str = "ad-hoc";

/// Kind of resource an automation acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Users,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Users => f.write_str("users"),
        }
    }
}

/// A realm role (`manager`) or a client role (`billing/viewer`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoleRef {
    pub client: Option<String>,
    pub name: String,
}

impl RoleRef {
    #[must_use]
    pub fn realm(name: impl Into<String>) -> Self {
        Self {
            client: None,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn client(client: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            client: Some(client.into()),
            name: name.into(),
        }
    }
}

impl FromStr for RoleRef {
    type Err = ValidationError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidRole(input.to_string());
        let text = input.trim();
        match text.split_once('/') {
            None if !text.is_empty() => Ok(Self::realm(text)),
            Some((client, name))
                if !client.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::client(client, name))
            }
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for RoleRef {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RoleRef> for String {
    fn from(value: RoleRef) -> Self {
        value.to_string()
    }
}

impl fmt::Display for RoleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.client {
            Some(client) => write!(f, "{client}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A change reported by the host server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    UserCreated {
        user_id: String,
    },
    UserDeleted {
        user_id: String,
    },
    UserLoggedIn {
        user_id: String,
        client_id: String,
    },
    RoleGranted {
        user_id: String,
        role: RoleRef,
    },
    RoleRevoked {
        user_id: String,
        role: RoleRef,
    },
    GroupMembershipAdded {
        user_id: String,
        group_path: String,
    },
    GroupMembershipRemoved {
        user_id: String,
        group_path: String,
    },
    FederatedIdentityAdded {
        user_id: String,
        identity_provider: String,
    },
    FederatedIdentityRemoved {
        user_id: String,
        identity_provider: String,
    },
}

impl DomainEvent {
    /// The user the event is about.
    #[must_use]
    pub fn user_id(&self) -> &str {
        match self {
            Self::UserCreated { user_id }
            | Self::UserDeleted { user_id }
            | Self::UserLoggedIn { user_id, .. }
            | Self::RoleGranted { user_id, .. }
            | Self::RoleRevoked { user_id, .. }
            | Self::GroupMembershipAdded { user_id, .. }
            | Self::GroupMembershipRemoved { user_id, .. }
            | Self::FederatedIdentityAdded { user_id, .. }
            | Self::FederatedIdentityRemoved { user_id, .. } => user_id,
        }
    }
}

impl fmt::Display for DomainEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UserCreated { .. } => "user_created",
            Self::UserDeleted { .. } => "user_deleted",
            Self::UserLoggedIn { .. } => "user_logged_in",
            Self::RoleGranted { .. } => "role_granted",
            Self::RoleRevoked { .. } => "role_revoked",
            Self::GroupMembershipAdded { .. } => "group_membership_added",
            Self::GroupMembershipRemoved { .. } => "group_membership_removed",
            Self::FederatedIdentityAdded { .. } => "federated_identity_added",
            Self::FederatedIdentityRemoved { .. } => "federated_identity_removed",
        };
        write!(f, "{name}({})", self.user_id())
    }
}

/// What an [`AutomationEvent`] was created from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum EventPayload {
    Domain { event: DomainEvent },
    AdHoc,
}

/// A normalized event that can activate automations.
///
/// Always carries a resolved resource id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationEvent {
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub provider_id: String,
    pub payload: EventPayload,
    pub occurred_at: Timestamp,
}

impl AutomationEvent {
    /// Build an event from a raw domain event.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MissingResourceId`] if `resource_id` is blank.
    pub fn from_domain(
        resource_type: ResourceType,
        resource_id: impl Into<String>,
        provider_id: impl Into<String>,
        event: DomainEvent,
        occurred_at: Timestamp,
    ) -> Result<Self, ValidationError> {
        Self::new(
            resource_type,
            resource_id.into(),
            provider_id.into(),
            EventPayload::Domain { event },
            occurred_at,
        )
    }

    /// Build the synthetic event of an ad-hoc run.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MissingResourceId`] if `resource_id` is blank.
    pub fn ad_hoc(
        resource_type: ResourceType,
        resource_id: impl Into<String>,
        occurred_at: Timestamp,
    ) -> Result<Self, ValidationError> {
        Self::new(
            resource_type,
            resource_id.into(),
            AD_HOC_PROVIDER_ID.to_string(),
            EventPayload::AdHoc,
            occurred_at,
        )
    }

    fn new(
        resource_type: ResourceType,
        resource_id: String,
        provider_id: String,
        payload: EventPayload,
        occurred_at: Timestamp,
    ) -> Result<Self, ValidationError> {
        if resource_id.trim().is_empty() {
            return Err(ValidationError::MissingResourceId);
        }
        Ok(Self {
            resource_type,
            resource_id,
            provider_id,
            payload,
            occurred_at,
        })
    }

    /// The raw event, unless this is an ad-hoc run.
    #[must_use]
    pub fn domain_event(&self) -> Option<&DomainEvent> {
        match &self.payload {
            EventPayload::Domain { event } => Some(event),
            EventPayload::AdHoc => None,
        }
    }

    #[must_use]
    pub fn is_ad_hoc(&self) -> bool {
        matches!(self.payload, EventPayload::AdHoc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::now;

    #[test]
    fn should_parse_realm_and_client_roles() {
        assert_eq!("manager".parse::<RoleRef>().unwrap(), RoleRef::realm("manager"));
        assert_eq!(
            "billing/viewer".parse::<RoleRef>().unwrap(),
            RoleRef::client("billing", "viewer")
        );
    }

    #[test]
    fn should_reject_malformed_roles() {
        assert!("".parse::<RoleRef>().is_err());
        assert!("/viewer".parse::<RoleRef>().is_err());
        assert!("billing/".parse::<RoleRef>().is_err());
        assert!("a/b/c".parse::<RoleRef>().is_err());
    }

    #[test]
    fn should_expose_user_id_of_every_event() {
        let event = DomainEvent::GroupMembershipAdded {
            user_id: "u-1".to_string(),
            group_path: "/staff".to_string(),
        };
        assert_eq!(event.user_id(), "u-1");
        assert_eq!(event.to_string(), "group_membership_added(u-1)");
    }

    #[test]
    fn should_refuse_automation_event_without_resource_id() {
        let event = DomainEvent::UserCreated {
            user_id: String::new(),
        };
        let result =
            AutomationEvent::from_domain(ResourceType::Users, "  ", "user-created", event, now());
        assert_eq!(result, Err(ValidationError::MissingResourceId));
    }

    #[test]
    fn should_mark_ad_hoc_events() {
        let event = AutomationEvent::ad_hoc(ResourceType::Users, "u-1", now()).unwrap();
        assert!(event.is_ad_hoc());
        assert_eq!(event.provider_id, AD_HOC_PROVIDER_ID);
        assert!(event.domain_event().is_none());
    }

    #[test]
    fn should_serialize_domain_event_with_type_tag() {
        let event = DomainEvent::RoleGranted {
            user_id: "u-1".to_string(),
            role: RoleRef::client("billing", "viewer"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "role_granted");
        assert_eq!(json["role"], "billing/viewer");
    }
}
