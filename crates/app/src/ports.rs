//! Port definitions: traits that adapters implement.
//!
//! Ports are the boundaries between the application core and the outside world.
//! They are defined here (in `app`) so that both the use-case layer and the
//! adapter layer can depend on them without creating circular dependencies.
//!
//! Storage ports use `impl Future` return types and are injected as generic
//! parameters. Ports that are looked up by id at runtime ([`Clock`],
//! [`DirectoryProvider`]) are object safe.

pub mod automation_repo;
pub mod clock;
pub mod cluster;
pub mod directory;
pub mod lease_store;
pub mod scheduled_step_store;
pub mod sync_provider_repo;
pub mod user_store;

pub use automation_repo::AutomationRepository;
pub use clock::Clock;
pub use cluster::ClusterNotifier;
pub use directory::DirectoryProvider;
pub use lease_store::LeaseStore;
pub use scheduled_step_store::ScheduledStepStore;
pub use sync_provider_repo::SyncProviderRepository;
pub use user_store::UserStore;
