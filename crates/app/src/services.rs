//! Application services: configuration use-cases.
//!
//! Each service applies a change locally, then announces it on the cluster
//! channel through the [`ClusterNotifier`](crate::ports::ClusterNotifier)
//! port.

pub mod automation_service;
pub mod sync_provider_service;
