//! Users: the resources automations and directory sync act upon.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::event::RoleRef;
use crate::time::Timestamp;

/// Canonical form of a group path: a leading `/`, no trailing `/`.
///
/// `staff/admins`, `/staff/admins` and `/staff/admins/` all normalize to
/// `/staff/admins`.
#[must_use]
pub fn normalize_group_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub enabled: bool,
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub groups: BTreeSet<String>,
    #[serde(default)]
    pub roles: BTreeSet<RoleRef>,
    #[serde(default)]
    pub required_actions: BTreeSet<String>,
    #[serde(default)]
    pub federated_identities: BTreeSet<String>,
    /// Id of the sync provider that imported this user, if any.
    #[serde(default)]
    pub federation_link: Option<String>,
    pub created_at: Timestamp,
    /// Write version, owned by the user store. An update based on an older
    /// version is rejected.
    #[serde(skip)]
    pub version: u64,
}

impl User {
    /// A new enabled user with a random id.
    #[must_use]
    pub fn new(username: impl Into<String>, created_at: Timestamp) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.into(),
            enabled: true,
            attributes: BTreeMap::new(),
            groups: BTreeSet::new(),
            roles: BTreeSet::new(),
            required_actions: BTreeSet::new(),
            federated_identities: BTreeSet::new(),
            federation_link: None,
            created_at,
            version: 0,
        }
    }

    #[must_use]
    pub fn is_member_of(&self, group_path: &str) -> bool {
        self.groups.contains(&normalize_group_path(group_path))
    }

    /// Returns `true` if the user was not already a member.
    pub fn join_group(&mut self, group_path: &str) -> bool {
        self.groups.insert(normalize_group_path(group_path))
    }

    /// Returns `true` if the user was a member.
    pub fn leave_group(&mut self, group_path: &str) -> bool {
        self.groups.remove(&normalize_group_path(group_path))
    }

    #[must_use]
    pub fn has_role(&self, role: &RoleRef) -> bool {
        self.roles.contains(role)
    }

    pub fn grant_role(&mut self, role: RoleRef) -> bool {
        self.roles.insert(role)
    }

    pub fn revoke_role(&mut self, role: &RoleRef) -> bool {
        self.roles.remove(role)
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&[String]> {
        self.attributes.get(name).map(Vec::as_slice)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, values: Vec<String>) {
        self.attributes.insert(name.into(), values);
    }

    pub fn remove_attribute(&mut self, name: &str) -> bool {
        self.attributes.remove(name).is_some()
    }

    pub fn add_required_action(&mut self, action: impl Into<String>) -> bool {
        self.required_actions.insert(action.into())
    }

    pub fn remove_required_action(&mut self, action: &str) -> bool {
        self.required_actions.remove(action)
    }

    #[must_use]
    pub fn is_linked_to(&self, identity_provider: &str) -> bool {
        self.federated_identities.contains(identity_provider)
    }

    pub fn link_identity(&mut self, identity_provider: impl Into<String>) -> bool {
        self.federated_identities.insert(identity_provider.into())
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }
}
