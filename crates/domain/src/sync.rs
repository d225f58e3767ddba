//! External directory synchronization: provider configuration and results.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KeywardError, ValidationError};
use crate::id::SyncProviderId;

/// Which kind of import a sync run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Import every entry of the directory.
    Full,
    /// Import entries changed since the last incremental run.
    Incremental,
}

impl SyncMode {
    pub const ALL: [Self; 2] = [Self::Full, Self::Incremental];
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("full"),
            Self::Incremental => f.write_str("incremental"),
        }
    }
}

/// Configuration and progress of one external directory.
///
/// A zero period disables periodic runs of that mode. Last-sync markers are
/// epoch seconds, zero meaning "never".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProviderConfig {
    pub id: SyncProviderId,
    pub name: String,
    /// Id of the directory provider implementation.
    pub kind: String,
    pub enabled: bool,
    pub import_enabled: bool,
    #[serde(with = "humantime_serde")]
    pub full_sync_period: Duration,
    #[serde(with = "humantime_serde")]
    pub incremental_sync_period: Duration,
    #[serde(default)]
    pub last_full_sync: i64,
    #[serde(default)]
    pub last_incremental_sync: i64,
}

impl SyncProviderConfig {
    /// An enabled, importing provider without periodic runs.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: SyncProviderId::new(),
            name: name.into(),
            kind: kind.into(),
            enabled: true,
            import_enabled: true,
            full_sync_period: Duration::ZERO,
            incremental_sync_period: Duration::ZERO,
            last_full_sync: 0,
            last_incremental_sync: 0,
        }
    }

    #[must_use]
    pub fn with_period(mut self, mode: SyncMode, period: Duration) -> Self {
        match mode {
            SyncMode::Full => self.full_sync_period = period,
            SyncMode::Incremental => self.incremental_sync_period = period,
        }
        self
    }

    #[must_use]
    pub fn period(&self, mode: SyncMode) -> Duration {
        match mode {
            SyncMode::Full => self.full_sync_period,
            SyncMode::Incremental => self.incremental_sync_period,
        }
    }

    #[must_use]
    pub fn last_sync(&self, mode: SyncMode) -> i64 {
        match mode {
            SyncMode::Full => self.last_full_sync,
            SyncMode::Incremental => self.last_incremental_sync,
        }
    }

    pub fn set_last_sync(&mut self, mode: SyncMode, at: i64) {
        match mode {
            SyncMode::Full => self.last_full_sync = at,
            SyncMode::Incremental => self.last_incremental_sync = at,
        }
    }

    /// Whether periodic runs of `mode` should be registered at all.
    #[must_use]
    pub fn is_schedulable(&self, mode: SyncMode) -> bool {
        self.enabled && self.import_enabled && !self.period(mode).is_zero()
    }

    /// Whether a periodic run of `mode` at `now` (epoch seconds) should do work.
    ///
    /// Runs that never happened are always due; otherwise strictly more than
    /// one period must have passed since the last recorded run.
    #[must_use]
    pub fn is_sync_due(&self, mode: SyncMode, now: i64) -> bool {
        let last = self.last_sync(mode);
        if last <= 0 {
            return true;
        }
        let period = i64::try_from(self.period(mode).as_secs()).unwrap_or(i64::MAX);
        now.saturating_sub(last) > period
    }

    /// First epoch second at which [`is_sync_due`](Self::is_sync_due) holds
    /// again, `None` if `mode` never ran.
    #[must_use]
    pub fn next_sync_due(&self, mode: SyncMode) -> Option<i64> {
        let last = self.last_sync(mode);
        if last <= 0 {
            return None;
        }
        let period = i64::try_from(self.period(mode).as_secs()).unwrap_or(i64::MAX);
        Some(last.saturating_add(period).saturating_add(1))
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyName`] or
    /// [`ValidationError::EmptyProviderId`] for blank name or kind.
    pub fn validate(&self) -> Result<(), KeywardError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if self.kind.trim().is_empty() {
            return Err(ValidationError::EmptyProviderId.into());
        }
        Ok(())
    }
}

/// Counters reported by one sync run.
///
/// `ignored` marks runs that did no work; they do not advance the last-sync
/// marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynchronizationResult {
    pub added: u32,
    pub updated: u32,
    pub removed: u32,
    pub failed: u32,
    pub ignored: bool,
}

impl SynchronizationResult {
    #[must_use]
    pub fn ignored() -> Self {
        Self {
            ignored: true,
            ..Self::default()
        }
    }
}

impl fmt::Display for SynchronizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ignored {
            return f.write_str("ignored");
        }
        write!(
            f,
            "{} added, {} updated, {} removed, {} failed",
            self.added, self.updated, self.removed, self.failed
        )
    }
}
