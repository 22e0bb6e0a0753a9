//! Event bus for dispatch auditing
//!
//! Provides pub/sub messaging using Tokio broadcast channels and keeps a
//! bounded in-memory history with per-type counts for inspection.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::sink::AuditSink;
use super::types::{DispatchEvent, EventId};
use crate::error::AuditError;
use crate::types::TaskId;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Default number of events retained in memory
const DEFAULT_HISTORY: usize = 1024;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// A retained event stamped with its bus-assigned id
#[derive(Debug, Clone, Serialize)]
pub struct RecordedEvent {
    pub id: EventId,
    pub event: DispatchEvent,
}

struct History {
    events: VecDeque<RecordedEvent>,
    counts: BTreeMap<&'static str, u64>,
    capacity: usize,
}

/// Event bus with broadcast channels and bounded history
pub struct EventBus {
    sender: broadcast::Sender<DispatchEvent>,
    history: Mutex<History>,
}

impl EventBus {
    /// Create a new event bus with the default history size
    pub fn new() -> Self {
        Self::with_history(DEFAULT_HISTORY)
    }

    /// Create an event bus retaining at most `capacity` events
    pub fn with_history(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            history: Mutex::new(History {
                events: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY)),
                counts: BTreeMap::new(),
                capacity,
            }),
        }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    fn history(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(|poisoned| {
            warn!("Event history lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Publish an event to all subscribers and record it under a fresh id
    pub fn publish(&self, event: DispatchEvent) -> usize {
        let event_type = event.event_type();
        let id = DispatchEvent::new_id();

        {
            let mut history = self.history();
            *history.counts.entry(event_type).or_insert(0) += 1;
            if history.capacity > 0 {
                if history.events.len() == history.capacity {
                    history.events.pop_front();
                }
                history.events.push_back(RecordedEvent {
                    id: id.clone(),
                    event: event.clone(),
                });
            }
        }

        // Broadcast to subscribers (ignore if no receivers)
        match self.sender.send(event) {
            Ok(count) => {
                debug!(event_type, event_id = %id, receivers = count, "Event published");
                count
            }
            Err(_) => {
                debug!(event_type, event_id = %id, "Event published (no receivers)");
                0
            }
        }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Most recent `n` events, oldest first
    pub fn recent(&self, n: usize) -> Vec<DispatchEvent> {
        let history = self.history();
        let skip = history.events.len().saturating_sub(n);
        history
            .events
            .iter()
            .skip(skip)
            .map(|r| r.event.clone())
            .collect()
    }

    /// Most recent `n` events with their ids, oldest first
    pub fn recent_recorded(&self, n: usize) -> Vec<RecordedEvent> {
        let history = self.history();
        let skip = history.events.len().saturating_sub(n);
        history.events.iter().skip(skip).cloned().collect()
    }

    /// Retained event with the given id
    pub fn get(&self, id: &str) -> Option<DispatchEvent> {
        self.history()
            .events
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.event.clone())
    }

    /// Retained events for one task, oldest first
    pub fn events_for_task(&self, task_id: TaskId) -> Vec<DispatchEvent> {
        self.history()
            .events
            .iter()
            .filter(|r| r.event.task_id() == Some(task_id))
            .map(|r| r.event.clone())
            .collect()
    }

    /// Lifetime count per event type (not bounded by history size)
    pub fn counts(&self) -> BTreeMap<&'static str, u64> {
        self.history().counts.clone()
    }

    /// Lifetime count for one event type
    pub fn count(&self, event_type: &str) -> u64 {
        self.history().counts.get(event_type).copied().unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for EventBus {
    fn log(&self, event: &DispatchEvent) -> Result<(), AuditError> {
        self.publish(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;
    use chrono::Utc;

    fn no_candidate(task_id: TaskId) -> DispatchEvent {
        DispatchEvent::NoCandidate {
            task_id,
            capability: Some("rust".to_string()),
            priority: Priority::Normal,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        assert_eq!(bus.publish(no_candidate(1)), 1);

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type(), "no_candidate");
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new().shared();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(no_candidate(2));

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1.task_id(), e2.task_id());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(no_candidate(3)), 0);
        assert_eq!(bus.count("no_candidate"), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let bus = EventBus::with_history(2);
        for id in 1..=5 {
            bus.publish(no_candidate(id));
        }

        let recent = bus.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].task_id(), Some(4));
        assert_eq!(recent[1].task_id(), Some(5));
        assert_eq!(bus.counts()["no_candidate"], 5);
        assert!(bus.events_for_task(1).is_empty());
        assert_eq!(bus.events_for_task(5).len(), 1);
    }

    #[test]
    fn test_history_entries_carry_distinct_ids() {
        let bus = EventBus::with_history(2);
        for id in 1..=3 {
            bus.publish(no_candidate(id));
        }

        let recorded = bus.recent_recorded(10);
        assert_eq!(recorded.len(), 2);
        assert_ne!(recorded[0].id, recorded[1].id);
        assert_eq!(bus.get(&recorded[1].id).unwrap().task_id(), Some(3));
        assert!(bus.get("no-such-id").is_none());

        let json = serde_json::to_value(&recorded[0]).unwrap();
        assert_eq!(json["event"]["type"], "no_candidate");
        assert_eq!(json["id"], recorded[0].id.as_str());
    }

    #[test]
    fn test_bus_as_audit_sink() {
        let bus = EventBus::new();
        let sink: &dyn AuditSink = &bus;
        sink.log(&no_candidate(9)).unwrap();
        assert_eq!(bus.recent(1)[0].task_id(), Some(9));
    }
}
