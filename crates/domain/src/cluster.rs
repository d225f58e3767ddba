//! Messages exchanged between nodes over the cluster notification channel.

use serde::{Deserialize, Serialize};

use crate::id::{AutomationId, SyncProviderId};

/// A configuration change every node must react to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClusterEvent {
    SyncProviderChanged {
        provider_id: SyncProviderId,
        removed: bool,
    },
    AutomationChanged {
        automation_id: AutomationId,
        removed: bool,
    },
}

/// A [`ClusterEvent`] stamped with the node that emitted it.
///
/// The emitting node already applied the change locally and skips its own
/// messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMessage {
    pub origin: String,
    pub event: ClusterEvent,
}

impl ClusterMessage {
    #[must_use]
    pub fn new(origin: impl Into<String>, event: ClusterEvent) -> Self {
        Self {
            origin: origin.into(),
            event,
        }
    }

    #[must_use]
    pub fn is_from(&self, node_id: &str) -> bool {
        self.origin == node_id
    }
}
