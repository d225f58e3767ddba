//! Configuration loading: TOML file with environment variable overrides.
//!
//! Looks for `keyward.toml` in the working directory. Every field has a
//! default so the file is optional. Environment variables take precedence
//! over file values. Durations are humantime strings such as `1h30m` or `250ms`.

use std::time::Duration;

use keyward_adapter_storage_sqlite_sqlx::Config as StorageConfig;
use keyward_adapter_virtual_directory::DirectoryEntry;
use keyward_app::automation_engine::EngineSettings;
use keyward_app::task_queue::SubmitOptions;
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity of this node in the cluster.
    pub node: NodeConfig,
    /// Database settings.
    pub database: DatabaseConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Automation engine tunables.
    pub engine: EngineConfig,
    /// Directory synchronization settings.
    pub sync: SyncConfig,
}

/// Cluster node configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Holder id written into leases. Must differ between nodes.
    pub id: String,
}

/// `SQLite` database configuration. All nodes of a cluster share it.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `SQLite` connection URL or file path.
    pub url: String,
    /// Pool size.
    pub max_connections: u32,
    /// How long a writer waits for another node's lock.
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// Automation engine configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Period of the cluster-wide sweep of due steps.
    #[serde(with = "humantime_serde")]
    pub step_runner_interval: Duration,
    /// Lease TTL of a single delayed step.
    #[serde(with = "humantime_serde")]
    pub step_lease_ttl: Duration,
    /// Wait for submitted work before returning to the caller.
    pub executor_blocking: bool,
    /// Deadline attached to submitted work.
    #[serde(with = "humantime_serde")]
    pub executor_task_timeout: Duration,
    /// Bound of the worker pool.
    pub worker_pool_size: usize,
}

/// Directory synchronization configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Feature switch for periodic synchronization.
    pub enabled: bool,
    /// How often the cluster channel is polled.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// How long cluster messages are kept before pruning.
    #[serde(with = "humantime_serde")]
    pub message_retention: Duration,
    /// Create a provider for the virtual directory at startup when none
    /// exists yet.
    pub virtual_provider: bool,
    /// Full sync period of that provider.
    #[serde(with = "humantime_serde")]
    pub virtual_full_sync_period: Duration,
    /// Entries the virtual directory starts with.
    pub virtual_entries: Vec<DirectoryEntry>,
}

impl Config {
    /// Load configuration from `keyward.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("keyward.toml")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("KEYWARD_NODE_ID") {
            self.node.id = val;
        }
        if let Ok(val) = std::env::var("KEYWARD_DATABASE_URL") {
            self.database.url = val;
        }
        if let Ok(val) = std::env::var("KEYWARD_WORKERS")
            && let Ok(workers) = val.parse()
        {
            self.engine.worker_pool_size = workers;
        }
        if let Ok(val) = std::env::var("KEYWARD_STEP_RUNNER_INTERVAL")
            && let Ok(interval) = humantime::parse_duration(&val)
        {
            self.engine.step_runner_interval = interval;
        }
        if let Ok(val) = std::env::var("KEYWARD_SYNC_ENABLED")
            && let Ok(enabled) = val.parse()
        {
            self.sync.enabled = enabled;
        }
        if let Ok(val) = std::env::var("KEYWARD_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.node.id.trim().is_empty() {
            return Err(ConfigError::Validation("node id must not be empty".to_string()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Validation(
                "max_connections must be non-zero".to_string(),
            ));
        }
        if self.engine.worker_pool_size == 0 {
            return Err(ConfigError::Validation(
                "worker_pool_size must be non-zero".to_string(),
            ));
        }
        let durations = [
            ("step_runner_interval", self.engine.step_runner_interval),
            ("step_lease_ttl", self.engine.step_lease_ttl),
            ("executor_task_timeout", self.engine.executor_task_timeout),
            ("poll_interval", self.sync.poll_interval),
            ("message_retention", self.sync.message_retention),
            ("virtual_full_sync_period", self.sync.virtual_full_sync_period),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, value)| value.is_zero()) {
            return Err(ConfigError::Validation(format!("{name} must be non-zero")));
        }
        Ok(())
    }

    /// Storage adapter configuration.
    #[must_use]
    pub fn storage(&self) -> StorageConfig {
        StorageConfig {
            max_connections: self.database.max_connections,
            busy_timeout: self.database.busy_timeout,
            ..StorageConfig::new(self.database.url.as_str())
        }
    }

    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            step_lease_ttl: self.engine.step_lease_ttl,
            step_runner_interval: self.engine.step_runner_interval,
        }
    }

    #[must_use]
    pub fn submit_options(&self) -> SubmitOptions {
        SubmitOptions {
            blocking: self.engine.executor_blocking,
            timeout: self.engine.executor_task_timeout,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:keyward.db?mode=rwc".to_string(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "keywardd=info,keyward=info".to_string(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let settings = EngineSettings::default();
        let options = SubmitOptions::default();
        Self {
            step_runner_interval: settings.step_runner_interval,
            step_lease_ttl: settings.step_lease_ttl,
            executor_blocking: options.blocking,
            executor_task_timeout: options.timeout,
            worker_pool_size: 8,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(1),
            message_retention: Duration::from_secs(60 * 60),
            virtual_provider: false,
            virtual_full_sync_period: Duration::from_secs(60 * 60),
            virtual_entries: Vec::new(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
