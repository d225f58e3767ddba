//! # keyward-app
//!
//! Application layer: use-cases, cluster coordination and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement (driven/outbound ports):
//!   - `AutomationRepository`, `SyncProviderRepository`: configuration storage
//!   - `UserStore`: the resources automations mutate
//!   - `ScheduledStepStore`: delayed steps shared by every node
//!   - `LeaseStore`: atomic, TTL-bounded key ownership
//!   - `ClusterNotifier`: configuration change broadcast
//!   - `DirectoryProvider`: external user directories
//! - Provide the node-local machinery: `LocalScheduler` timers and the
//!   `TransactionalTaskQueue` worker pool
//! - Coordinate nodes through the `LeaseCoordinator`
//! - Turn events into work: `EventMatcher`, `AutomationRegistry`,
//!   `StepExecutor`, `AutomationEngine`
//! - Import external directories periodically through the `SyncRunner`
//!
//! ## Dependency rule
//! Depends on `keyward-domain` only (plus `tokio` for timers and channels).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod automation_engine;
pub mod clock;
pub mod cluster_bus;
pub mod executor;
pub mod lease_coordinator;
pub mod matcher;
pub mod memory_lease_store;
pub mod ports;
pub mod providers;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod services;
pub mod steps;
pub mod sync_runner;
pub mod task_queue;

#[cfg(test)]
mod testing;
