//! Step kinds: the mutations an automation step can apply to a user.
//!
//! Each kind reads its own keys from the step's [`StepConfig`]. Group paths
//! are normalized, roles use the `client/role` form for client roles.

use keyward_domain::automation::StepConfig;
use keyward_domain::error::StepError;
use keyward_domain::event::RoleRef;
use keyward_domain::user::User;

/// A pluggable step kind, looked up by the `provider_id` of a step.
pub trait StepProvider: Send + Sync {
    fn id(&self) -> &'static str;

    /// Check `config` when an automation is saved.
    ///
    /// # Errors
    ///
    /// Returns a [`StepError`] describing the first unusable key.
    fn validate(&self, config: &StepConfig) -> Result<(), StepError>;

    /// Apply the step to `user`. The caller persists the user afterwards.
    ///
    /// # Errors
    ///
    /// Returns a [`StepError`] when the configuration cannot be applied.
    fn run(&self, user: &mut User, config: &StepConfig) -> Result<(), StepError>;
}

fn required<'a>(config: &'a StepConfig, key: &'static str) -> Result<&'a [String], StepError> {
    let values = config.values(key);
    if values.is_empty() {
        return Err(StepError::MissingConfig { key });
    }
    if let Some(blank) = values.iter().find(|value| value.trim().is_empty()) {
        return Err(StepError::InvalidValue {
            key,
            value: blank.clone(),
        });
    }
    Ok(values)
}

fn roles(config: &StepConfig) -> Result<Vec<RoleRef>, StepError> {
    required(config, "role")?
        .iter()
        .map(|value| {
            value.parse().map_err(|_| StepError::InvalidValue {
                key: "role",
                value: value.clone(),
            })
        })
        .collect()
}

/// Set every non-reserved key as an attribute, replacing existing values.
pub struct SetAttribute;

impl StepProvider for SetAttribute {
    fn id(&self) -> &'static str {
        "set-attribute"
    }

    fn validate(&self, config: &StepConfig) -> Result<(), StepError> {
        if config.is_empty() {
            return Err(StepError::MissingConfig { key: "attribute" });
        }
        match config.entries().find(|(name, _)| name.trim().is_empty()) {
            Some((name, _)) => Err(StepError::InvalidValue {
                key: "attribute",
                value: name.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn run(&self, user: &mut User, config: &StepConfig) -> Result<(), StepError> {
        self.validate(config)?;
        for (name, values) in config.entries() {
            user.set_attribute(name, values.to_vec());
        }
        Ok(())
    }
}

/// Remove the attributes named by `attribute`.
pub struct RemoveAttribute;

impl StepProvider for RemoveAttribute {
    fn id(&self) -> &'static str {
        "remove-attribute"
    }

    fn validate(&self, config: &StepConfig) -> Result<(), StepError> {
        required(config, "attribute").map(|_| ())
    }

    fn run(&self, user: &mut User, config: &StepConfig) -> Result<(), StepError> {
        for name in required(config, "attribute")? {
            user.remove_attribute(name);
        }
        Ok(())
    }
}

/// Add the user to every `group`.
pub struct JoinGroup;

impl StepProvider for JoinGroup {
    fn id(&self) -> &'static str {
        "join-group"
    }

    fn validate(&self, config: &StepConfig) -> Result<(), StepError> {
        required(config, "group").map(|_| ())
    }

    fn run(&self, user: &mut User, config: &StepConfig) -> Result<(), StepError> {
        for group in required(config, "group")? {
            user.join_group(group);
        }
        Ok(())
    }
}

/// Remove the user from every `group`.
pub struct LeaveGroup;

impl StepProvider for LeaveGroup {
    fn id(&self) -> &'static str {
        "leave-group"
    }

    fn validate(&self, config: &StepConfig) -> Result<(), StepError> {
        required(config, "group").map(|_| ())
    }

    fn run(&self, user: &mut User, config: &StepConfig) -> Result<(), StepError> {
        for group in required(config, "group")? {
            user.leave_group(group);
        }
        Ok(())
    }
}

/// Grant every `role`.
pub struct GrantRole;

impl StepProvider for GrantRole {
    fn id(&self) -> &'static str {
        "grant-role"
    }

    fn validate(&self, config: &StepConfig) -> Result<(), StepError> {
        roles(config).map(|_| ())
    }

    fn run(&self, user: &mut User, config: &StepConfig) -> Result<(), StepError> {
        for role in roles(config)? {
            user.grant_role(role);
        }
        Ok(())
    }
}

/// Revoke every `role`.
pub struct RevokeRole;

impl StepProvider for RevokeRole {
    fn id(&self) -> &'static str {
        "revoke-role"
    }

    fn validate(&self, config: &StepConfig) -> Result<(), StepError> {
        roles(config).map(|_| ())
    }

    fn run(&self, user: &mut User, config: &StepConfig) -> Result<(), StepError> {
        for role in roles(config)? {
            user.revoke_role(&role);
        }
        Ok(())
    }
}

pub struct AddRequiredAction;

impl StepProvider for AddRequiredAction {
    fn id(&self) -> &'static str {
        "add-required-action"
    }

    fn validate(&self, config: &StepConfig) -> Result<(), StepError> {
        required(config, "action").map(|_| ())
    }

    fn run(&self, user: &mut User, config: &StepConfig) -> Result<(), StepError> {
        for action in required(config, "action")? {
            user.add_required_action(action.trim());
        }
        Ok(())
    }
}

pub struct RemoveRequiredAction;

impl StepProvider for RemoveRequiredAction {
    fn id(&self) -> &'static str {
        "remove-required-action"
    }

    fn validate(&self, config: &StepConfig) -> Result<(), StepError> {
        required(config, "action").map(|_| ())
    }

    fn run(&self, user: &mut User, config: &StepConfig) -> Result<(), StepError> {
        for action in required(config, "action")? {
            user.remove_required_action(action.trim());
        }
        Ok(())
    }
}

/// Disable the account. Takes no configuration.
pub struct DisableUser;

impl StepProvider for DisableUser {
    fn id(&self) -> &'static str {
        "disable-user"
    }

    fn validate(&self, _config: &StepConfig) -> Result<(), StepError> {
        Ok(())
    }

    fn run(&self, user: &mut User, _config: &StepConfig) -> Result<(), StepError> {
        user.disable();
        Ok(())
    }
}
