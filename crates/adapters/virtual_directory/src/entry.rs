//! Entries of the simulated directory.

use std::collections::BTreeMap;

use serde::Deserialize;

use keyward_domain::id::SyncProviderId;
use keyward_domain::time::Timestamp;
use keyward_domain::user::User;

/// A user as the external directory describes it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DirectoryEntry {
    pub username: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl DirectoryEntry {
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            attributes: BTreeMap::new(),
            groups: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    #[must_use]
    pub fn with_group(mut self, path: impl Into<String>) -> Self {
        self.groups.push(path.into());
        self
    }

    /// A new local user linked to `provider_id`.
    pub(crate) fn to_user(&self, provider_id: SyncProviderId, at: Timestamp) -> User {
        let mut user = User::new(&self.username, at);
        user.federation_link = Some(provider_id.to_string());
        self.apply_to(&mut user);
        user
    }

    /// Copy directory-owned data onto `user`. Returns `true` if anything
    /// changed.
    pub(crate) fn apply_to(&self, user: &mut User) -> bool {
        let mut changed = false;
        for (name, values) in &self.attributes {
            if user.attribute(name) != Some(values.as_slice()) {
                user.set_attribute(name.clone(), values.clone());
                changed = true;
            }
        }
        for group in &self.groups {
            changed |= user.join_group(group);
        }
        changed
    }
}

/// A stored entry with the time it last changed.
#[derive(Debug, Clone)]
pub(crate) struct Stamped<T> {
    pub value: T,
    pub changed_at: Timestamp,
}
