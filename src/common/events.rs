//! Notification bus for committed cluster state changes
//!
//! Publishing never blocks the request path: the bus is a bounded broadcast
//! channel, slow subscribers lose the oldest events and a bus without
//! subscribers silently drops.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "volume.created")]
    VolumeCreated,
    #[serde(rename = "volume.started")]
    VolumeStarted,
    #[serde(rename = "volume.stopped")]
    VolumeStopped,
    #[serde(rename = "volume.options.set")]
    VolumeOptionsSet,
}

/// Event published after a state change has been committed to the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub volume: String,
    /// Node that coordinated the change
    pub origin: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Event {
    pub fn new(kind: EventKind, volume: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            kind,
            volume: volume.into(),
            origin: origin.into(),
            timestamp: chrono::Utc::now().timestamp(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Fire-and-forget publish
    pub fn publish(&self, event: Event) {
        let kind = event.kind;
        if self.tx.send(event).is_err() {
            tracing::debug!(?kind, "No event subscribers, event dropped");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
