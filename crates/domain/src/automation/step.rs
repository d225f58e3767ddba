//! Steps: the effects an automation applies to its resource.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::id::StepId;

/// Keys with a dedicated meaning on [`StepDefinition`] that step kinds must not
/// interpret as their own configuration.
pub const RESERVED_KEYS: [&str; 2] = ["after", "priority"];

/// Multi-valued string configuration of a step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepConfig(BTreeMap<String, Vec<String>>);

impl StepConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value` under `key`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.entry(key.into()).or_default().push(value.into());
        self
    }

    /// First value stored under `key`.
    #[must_use]
    pub fn first(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values stored under `key`.
    #[must_use]
    pub fn values(&self, key: &str) -> &[String] {
        self.0.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Iterate over non-reserved entries.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0
            .iter()
            .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
            .map(|(key, values)| (key.as_str(), values.as_slice()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().next().is_none()
    }
}

/// One step of an automation.
///
/// `after` is relative to the moment the automation was triggered. Steps run
/// in ascending `priority`; equal priorities keep declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    #[serde(default)]
    pub id: StepId,
    pub provider_id: String,
    #[serde(default)]
    pub config: StepConfig,
    #[serde(default, with = "humantime_serde")]
    pub after: Duration,
    #[serde(default)]
    pub priority: i32,
}

impl StepDefinition {
    /// A step without configuration that runs immediately.
    #[must_use]
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            id: StepId::new(),
            provider_id: provider_id.into(),
            config: StepConfig::default(),
            after: Duration::ZERO,
            priority: 0,
        }
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config = self.config.with(key, value);
        self
    }

    #[must_use]
    pub fn after(mut self, after: Duration) -> Self {
        self.after = after;
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Whether the step runs in the triggering activation instead of later.
    #[must_use]
    pub fn is_immediate(&self) -> bool {
        self.after.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_collect_multiple_values_under_one_key() {
        let config = StepConfig::new()
            .with("department", "sales")
            .with("department", "support");
        assert_eq!(config.first("department"), Some("sales"));
        assert_eq!(config.values("department").len(), 2);
        assert!(config.values("missing").is_empty());
    }

    #[test]
    fn should_hide_reserved_keys_from_entries() {
        let config = StepConfig::new()
            .with("after", "5d")
            .with("priority", "1")
            .with("title", "engineer");
        let keys: Vec<&str> = config.entries().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["title"]);
    }

    #[test]
    fn should_deserialize_step_with_textual_delay() {
        let json = r#"{
            "provider_id": "disable-user",
            "after": "5d",
            "priority": 2
        }"#;
        let step: StepDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(step.after, Duration::from_secs(5 * 86_400));
        assert_eq!(step.priority, 2);
        assert!(!step.is_immediate());
        assert!(step.config.is_empty());
    }

    #[test]
    fn should_default_to_immediate_step() {
        let step = StepDefinition::new("join-group").with("group", "/staff");
        assert!(step.is_immediate());
        assert_eq!(step.config.first("group"), Some("/staff"));
    }
}
