//! Per-owner update event bus.
//!
//! Every owner gets its own broadcast channel, created on first subscribe.
//! Publishing never blocks: events for owners with no live subscriber are
//! dropped, and a lagging subscriber skips what it missed.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use patchpilot_ai::{AgentEvent, AgentEventSink};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

const BUFFER_CAPACITY: usize = 256;

/// One notification pushed to an owner's subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent {
    pub sequence: u64,
    pub task_id: String,
    pub owner_id: String,
    pub timestamp: DateTime<Utc>,
    pub event: AgentEvent,
}

pub struct EventBus {
    channels: DashMap<String, broadcast::Sender<UpdateEvent>>,
    sequence: AtomicU64,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BUFFER_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            sequence: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    /// Publish an event for `owner_id`. Returns the stamped event.
    pub fn publish(&self, owner_id: &str, task_id: &str, event: AgentEvent) -> UpdateEvent {
        let update = UpdateEvent {
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            task_id: task_id.to_string(),
            owner_id: owner_id.to_string(),
            timestamp: Utc::now(),
            event,
        };

        let delivered = match self.channels.get(owner_id) {
            Some(sender) => sender.send(update.clone()).is_ok(),
            None => false,
        };
        if !delivered {
            trace!(owner_id = %owner_id, sequence = update.sequence, "No subscribers for update");
            self.channels
                .remove_if(owner_id, |_, sender| sender.receiver_count() == 0);
        }
        update
    }

    /// Subscribe to every event published for `owner_id` from now on.
    pub fn subscribe(&self, owner_id: &str) -> broadcast::Receiver<UpdateEvent> {
        self.channels
            .entry(owner_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, owner_id: &str) -> usize {
        self.channels
            .get(owner_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

/// Routes one task's [`AgentEvent`]s onto the bus.
pub struct TaskEventSink<'a> {
    bus: &'a EventBus,
    owner_id: &'a str,
    task_id: &'a str,
}

impl<'a> TaskEventSink<'a> {
    pub fn new(bus: &'a EventBus, owner_id: &'a str, task_id: &'a str) -> Self {
        Self {
            bus,
            owner_id,
            task_id,
        }
    }
}

impl AgentEventSink for TaskEventSink<'_> {
    fn emit(&mut self, event: AgentEvent) {
        self.bus.publish(self.owner_id, self.task_id, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_are_scoped_to_owner() {
        let bus = EventBus::default();
        let mut alice = bus.subscribe("alice");
        let mut bob = bus.subscribe("bob");

        bus.publish("alice", "task-1", AgentEvent::TaskCancelled);

        let received = alice.recv().await.unwrap();
        assert_eq!(received.task_id, "task-1");
        assert_eq!(received.event, AgentEvent::TaskCancelled);
        assert!(matches!(
            bob.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_sequence_is_monotonic() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe("alice");
        for _ in 0..3 {
            bus.publish("alice", "task-1", AgentEvent::TaskCancelled);
        }
        let mut last = 0;
        for _ in 0..3 {
            let event = rx.recv().await.unwrap();
            assert!(event.sequence > last);
            last = event.sequence;
        }
    }

    #[test]
    fn test_publish_without_subscribers_does_not_block() {
        let bus = EventBus::new(1);
        for _ in 0..10 {
            bus.publish("nobody", "task-1", AgentEvent::TaskCancelled);
        }
        assert_eq!(bus.subscriber_count("nobody"), 0);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_missed_events() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe("alice");
        for _ in 0..5 {
            bus.publish("alice", "task-1", AgentEvent::TaskCancelled);
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert_eq!(rx.recv().await.unwrap().sequence, 4);
    }

    #[test]
    fn test_update_event_wire_shape() {
        let bus = EventBus::default();
        let update = bus.publish(
            "alice",
            "task-1",
            AgentEvent::TaskFailed {
                error: "boom".to_string(),
            },
        );
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["event"]["type"], "task_failed");
        assert_eq!(value["event"]["error"], "boom");
        assert_eq!(value["owner_id"], "alice");
    }
}
