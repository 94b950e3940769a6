//! Change notification for vault and release state.
//!
//! Components publish [`VaultEvent`]s on a shared [`EventBus`]; anything that
//! cares (a UI, the audit log writer, tests) subscribes to a broadcast
//! receiver. Publishing never fails: with no subscribers the event is dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::models::ReleaseStatus;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VaultEvent {
    ItemImported { item_id: Uuid, name: String, size: u64 },
    ItemUpdated { item_id: Uuid },
    ItemDeleted { item_id: Uuid },
    InheritanceConfigured { item_id: Uuid, threshold: u8, total_shares: u8 },
    InheritanceDisabled { item_id: Uuid },
    StatusChanged { item_id: Uuid, from: ReleaseStatus, to: ReleaseStatus },
    WarningRaised { item_id: Uuid, days_remaining: u32, bucket: u32 },
    WarningsCleared { item_id: Uuid, count: usize },
    ActivityRecorded { at: DateTime<Utc> },
    ShardPackaged { item_id: Uuid, shard_index: u8, package_id: Uuid },
    ShardAcknowledged { item_id: Uuid, shard_index: u8 },
}

impl VaultEvent {
    /// Stable label used as the audit log `event_type`.
    pub fn label(&self) -> &'static str {
        match self {
            VaultEvent::ItemImported { .. } => "ITEM_IMPORTED",
            VaultEvent::ItemUpdated { .. } => "ITEM_UPDATED",
            VaultEvent::ItemDeleted { .. } => "ITEM_DELETED",
            VaultEvent::InheritanceConfigured { .. } => "INHERITANCE_CONFIGURED",
            VaultEvent::InheritanceDisabled { .. } => "INHERITANCE_DISABLED",
            VaultEvent::StatusChanged { .. } => "STATUS_CHANGED",
            VaultEvent::WarningRaised { .. } => "WARNING_RAISED",
            VaultEvent::WarningsCleared { .. } => "WARNINGS_CLEARED",
            VaultEvent::ActivityRecorded { .. } => "ACTIVITY_RECORDED",
            VaultEvent::ShardPackaged { .. } => "SHARD_PACKAGED",
            VaultEvent::ShardAcknowledged { .. } => "SHARD_ACKNOWLEDGED",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<VaultEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: VaultEvent) {
        trace!(kind = event.label(), "publishing vault event");
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();
        bus.publish(VaultEvent::ItemDeleted { item_id: id });
        assert_eq!(rx.recv().await.unwrap(), VaultEvent::ItemDeleted { item_id: id });
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        EventBus::new().publish(VaultEvent::ActivityRecorded { at: Utc::now() });
    }

    #[test]
    fn events_serialize_with_kind_tag() {
        let event = VaultEvent::ShardAcknowledged {
            item_id: Uuid::nil(),
            shard_index: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "shard_acknowledged");
        assert_eq!(event.label(), "SHARD_ACKNOWLEDGED");
    }
}
