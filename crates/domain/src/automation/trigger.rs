//! Trigger specification, written `<provider-id>` or `<provider-id>(<parameter>)`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Which event kind activates an automation, optionally narrowed by one parameter.
///
/// `user-role-granted(manager)` activates on grants of the `manager` role only,
/// `user-created` on every new user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TriggerSpec {
    pub provider_id: String,
    pub parameter: Option<String>,
}

impl TriggerSpec {
    /// Trigger on every event of the given provider.
    #[must_use]
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            parameter: None,
        }
    }

    /// Narrow the trigger to events matching `parameter`.
    #[must_use]
    pub fn with_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.parameter = Some(parameter.into());
        self
    }

    /// The parameter, if any.
    #[must_use]
    pub fn parameter(&self) -> Option<&str> {
        self.parameter.as_deref()
    }
}

pub(super) fn is_valid_provider_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

impl FromStr for TriggerSpec {
    type Err = ValidationError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| ValidationError::InvalidTrigger {
            input: input.to_string(),
            reason,
        };
        let text = input.trim();

        let (provider_id, parameter) = match text.split_once('(') {
            None => (text, None),
            Some((id, rest)) => {
                let param = rest
                    .strip_suffix(')')
                    .ok_or_else(|| invalid("missing closing parenthesis"))?
                    .trim();
                if param.is_empty() {
                    return Err(invalid("empty parameter"));
                }
                if param.contains(['(', ')']) {
                    return Err(invalid("nested parentheses"));
                }
                (id.trim(), Some(param.to_string()))
            }
        };

        if !is_valid_provider_id(provider_id) {
            return Err(invalid(
                "provider id must be lowercase letters, digits and dashes",
            ));
        }

        Ok(Self {
            provider_id: provider_id.to_string(),
            parameter,
        })
    }
}

impl TryFrom<String> for TriggerSpec {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TriggerSpec> for String {
    fn from(value: TriggerSpec) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TriggerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parameter {
            Some(param) => write!(f, "{}({param})", self.provider_id),
            None => f.write_str(&self.provider_id),
        }
    }
}
