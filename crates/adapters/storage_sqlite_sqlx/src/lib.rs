//! # keyward-adapter-storage-sqlite-sqlx
//!
//! `SQLite` persistence adapter using [sqlx](https://docs.rs/sqlx).
//!
//! ## Responsibilities
//! - Implement the storage port traits defined in `keyward-app::ports`
//! - Provide the shared [`LeaseStore`](keyward_app::ports::LeaseStore) every node coordinates through
//! - Carry cluster notifications between processes through a polled table
//! - Manage `SQLite` connection pool lifecycle
//! - Run database migrations (using sqlx embedded migrations)
//! - Map between domain types and database rows
//!
//! ## Dependency rule
//! Depends on `keyward-app` (for port traits) and `keyward-domain` (for domain types).
//! The `app` and `domain` crates must never reference this adapter.

mod codec;

pub mod automation_repo;
pub mod cluster_channel;
pub mod error;
pub mod lease_store;
pub mod pool;
pub mod scheduled_step_repo;
pub mod sync_provider_repo;
pub mod user_store;

pub use automation_repo::SqliteAutomationRepository;
pub use cluster_channel::{ClusterPoller, SqliteClusterNotifier, spawn_poller};
pub use lease_store::SqliteLeaseStore;
pub use pool::{Config, Database};
pub use scheduled_step_repo::SqliteScheduledStepStore;
pub use sync_provider_repo::SqliteSyncProviderRepository;
pub use user_store::SqliteUserStore;
