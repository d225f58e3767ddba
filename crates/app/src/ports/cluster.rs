//! Cluster notification port: broadcast configuration changes to every node.

use std::future::Future;
use std::sync::Arc;

use keyward_domain::cluster::ClusterMessage;
use keyward_domain::error::KeywardError;

/// Delivers a [`ClusterMessage`] to all nodes, including the sender.
pub trait ClusterNotifier {
    fn notify(
        &self,
        message: ClusterMessage,
    ) -> impl Future<Output = Result<(), KeywardError>> + Send;
}

impl<T: ClusterNotifier + Send + Sync> ClusterNotifier for Arc<T> {
    fn notify(
        &self,
        message: ClusterMessage,
    ) -> impl Future<Output = Result<(), KeywardError>> + Send {
        (**self).notify(message)
    }
}
