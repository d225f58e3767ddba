//! In-process cluster bus backed by a tokio broadcast channel.
//!
//! Nodes sharing one process (tests, single-node deployments) use it as the
//! cluster notification channel. Cross-process transports feed the messages
//! they receive into the same kind of channel so [`spawn_listener`] works
//! unchanged.

use std::future::Future;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use keyward_domain::cluster::{ClusterEvent, ClusterMessage};
use keyward_domain::error::KeywardError;

use crate::ports::ClusterNotifier;

/// In-process cluster bus using a tokio [`broadcast`] channel.
///
/// Notifying succeeds even when there are no active subscribers
/// (the message is simply dropped).
#[derive(Debug, Clone)]
pub struct InProcessClusterBus {
    sender: broadcast::Sender<ClusterMessage>,
}

impl InProcessClusterBus {
    /// Create a new bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to messages on this bus.
    ///
    /// Returns a receiver that will get all messages sent *after*
    /// the subscription is created.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClusterMessage> {
        self.sender.subscribe()
    }

    /// Deliver a message received from another process to local subscribers.
    pub fn forward(&self, message: ClusterMessage) {
        let _ = self.sender.send(message);
    }
}

impl ClusterNotifier for InProcessClusterBus {
    fn notify(
        &self,
        message: ClusterMessage,
    ) -> impl Future<Output = Result<(), KeywardError>> + Send {
        // send only fails when nobody listens
        self.forward(message);
        async { Ok(()) }
    }
}

/// Hand every message emitted by *other* nodes to `handler`, one at a time,
/// until the channel closes.
pub fn spawn_listener<F, Fut>(
    receiver: broadcast::Receiver<ClusterMessage>,
    node_id: impl Into<String>,
    handler: F,
) -> JoinHandle<()>
where
    F: Fn(ClusterEvent) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let node_id = node_id.into();
    let mut stream = BroadcastStream::new(receiver);
    tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            match item {
                Ok(message) if message.is_from(&node_id) => {}
                Ok(message) => handler(message.event).await,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(node_id = %node_id, skipped, "cluster listener lagged behind");
                }
            }
        }
        tracing::debug!(node_id = %node_id, "cluster channel closed");
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use keyward_domain::id::{AutomationId, SyncProviderId};

    use super::*;

    fn removed_automation(origin: &str) -> ClusterMessage {
        ClusterMessage::new(
            origin,
            ClusterEvent::AutomationChanged {
                automation_id: AutomationId::new(),
                removed: true,
            },
        )
    }

    #[tokio::test]
    async fn should_deliver_message_to_multiple_subscribers() {
        let bus = InProcessClusterBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let message = removed_automation("node-1");
        bus.notify(message.clone()).await.unwrap();

        assert_eq!(rx1.recv().await.unwrap(), message);
        assert_eq!(rx2.recv().await.unwrap(), message);
    }

    #[tokio::test]
    async fn should_succeed_when_no_subscribers() {
        let bus = InProcessClusterBus::new(16);
        let result = bus.notify(removed_automation("node-1")).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn should_skip_own_messages_in_listener() {
        let bus = InProcessClusterBus::new(16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener = spawn_listener(bus.subscribe(), "node-1", move |event| {
            let sink = Arc::clone(&sink);
            async move { sink.lock().unwrap().push(event) }
        });

        let provider_id = SyncProviderId::new();
        bus.notify(removed_automation("node-1")).await.unwrap();
        bus.notify(ClusterMessage::new(
            "node-2",
            ClusterEvent::SyncProviderChanged {
                provider_id,
                removed: false,
            },
        ))
        .await
        .unwrap();
        drop(bus);
        listener.await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![ClusterEvent::SyncProviderChanged {
                provider_id,
                removed: false
            }]
        );
    }
}
