//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into
//! [`KeywardError`] via `#[from]`. Adapters box their storage errors into
//! [`KeywardError::Storage`].

/// Top-level error for every fallible keyward operation.
#[derive(Debug, thiserror::Error)]
pub enum KeywardError {
    /// A domain invariant was violated.
    #[error("validation error")]
    Validation(#[from] ValidationError),

    /// A referenced record does not exist.
    #[error("not found")]
    NotFound(#[from] NotFoundError),

    /// A configured provider id has no registered implementation.
    ///
    /// This is a fatal configuration error and is never swallowed.
    #[error("provider not found")]
    ProviderNotFound(#[from] ProviderNotFoundError),

    /// A record changed between being read and being written back.
    #[error("conflict")]
    Conflict(#[from] ConflictError),

    /// A step could not be applied to its resource.
    #[error("step failed")]
    Step(#[from] StepError),

    /// An adapter failed to read or write persistent state.
    #[error("storage error")]
    Storage(Box<dyn std::error::Error + Send + Sync>),
}

/// Invariant violations detected while building or parsing domain values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,

    #[error("an automation needs at least one step")]
    NoSteps,

    #[error("an automation needs a trigger")]
    MissingTrigger,

    #[error("provider id must not be empty")]
    EmptyProviderId,

    #[error("step {0} is declared more than once")]
    DuplicateStep(String),

    #[error("invalid trigger `{input}`: {reason}")]
    InvalidTrigger { input: String, reason: &'static str },

    #[error("invalid condition `{input}`: {reason}")]
    InvalidCondition { input: String, reason: &'static str },

    #[error("invalid configuration for condition `{provider_id}`: {reason}")]
    InvalidConditionConfig { provider_id: String, reason: String },

    #[error("invalid schedule: {0}")]
    InvalidSchedule(&'static str),

    #[error("invalid role reference `{0}`")]
    InvalidRole(String),

    #[error("an automation event needs a resource id")]
    MissingResourceId,

    #[error("invalid configuration for step provider `{provider_id}`: {reason}")]
    InvalidStepConfig { provider_id: String, reason: String },
}

/// A lookup by identifier found nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} {id} not found")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

/// A write was based on a stale version of the record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} {id} was modified concurrently")]
pub struct ConflictError {
    pub entity: &'static str,
    pub id: String,
}

/// Which registry a provider lookup went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Event,
    Step,
    Condition,
    Directory,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Event => f.write_str("event"),
            Self::Step => f.write_str("step"),
            Self::Condition => f.write_str("condition"),
            Self::Directory => f.write_str("directory"),
        }
    }
}

/// No provider is registered under the configured id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no {kind} provider registered for `{id}`")]
pub struct ProviderNotFoundError {
    pub kind: ProviderKind,
    pub id: String,
}

/// Failures raised by a step while mutating a resource.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    #[error("missing configuration key `{key}`")]
    MissingConfig { key: &'static str },

    #[error("invalid value `{value}` for configuration key `{key}`")]
    InvalidValue { key: &'static str, value: String },
}
