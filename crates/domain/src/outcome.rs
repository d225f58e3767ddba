//! Result taxonomy for lookups and guarded runs that may legitimately do nothing.

/// How an operation ended when not doing anything is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The work ran and produced `T`.
    Executed(T),
    /// The work was skipped: another node holds the lease, the period has
    /// not elapsed, or the automation is paused.
    Ignored,
    /// The target no longer exists. Periodic callers cancel themselves.
    NotFound,
    /// The target exists but its configuration cannot be acted upon.
    InvalidConfig(String),
}

impl<T> Outcome<T> {
    #[must_use]
    pub fn is_executed(&self) -> bool {
        matches!(self, Self::Executed(_))
    }

    #[must_use]
    pub fn executed(self) -> Option<T> {
        match self {
            Self::Executed(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Executed(value) => Outcome::Executed(f(value)),
            Self::Ignored => Outcome::Ignored,
            Self::NotFound => Outcome::NotFound,
            Self::InvalidConfig(reason) => Outcome::InvalidConfig(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_map_only_executed_values() {
        assert_eq!(Outcome::Executed(2).map(|v| v * 2), Outcome::Executed(4));
        assert_eq!(Outcome::<u8>::NotFound.map(|v| v * 2), Outcome::NotFound);
        assert_eq!(
            Outcome::<u8>::InvalidConfig("x".into()).map(u16::from),
            Outcome::InvalidConfig("x".into())
        );
    }

    #[test]
    fn should_expose_executed_value() {
        assert!(Outcome::Executed(()).is_executed());
        assert_eq!(Outcome::<u8>::Ignored.executed(), None);
    }
}
