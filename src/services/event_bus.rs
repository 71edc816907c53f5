//! Event Bus (C12): publish-subscribe fan-out of lifecycle events.
//!
//! Grounded on the teacher's `services::event_bus::EventBus` shape (a
//! `tokio::sync::broadcast` channel, monotonic `SequenceNumber`, per-event
//! timestamp and execution-scoped correlation id), narrowed to the nine
//! canonical workflow-engine events in spec §4.10. Per the REDESIGN FLAGS
//! event-bus note, emission is asynchronous via the broadcast channel's
//! bounded mailbox rather than synchronous inline calls, so a slow
//! subscriber cannot back-pressure the Workflow Executor; a subscriber task
//! that panics or errors is isolated and logged, never propagated back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Monotonically increasing sequence number assigned at publish time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

/// Canonical lifecycle event names (spec §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    EngineStarted,
    EngineStopped,
    WorkflowStarted,
    WorkflowCompleted,
    WorkflowFailed,
    StepStarted,
    StepCompleted,
    StepFailed,
}

impl EventKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::EngineStarted => "engine.started",
            Self::EngineStopped => "engine.stopped",
            Self::WorkflowStarted => "workflow.started",
            Self::WorkflowCompleted => "workflow.completed",
            Self::WorkflowFailed => "workflow.failed",
            Self::StepStarted => "step.started",
            Self::StepCompleted => "step.completed",
            Self::StepFailed => "step.failed",
        }
    }
}

/// Event payload carried alongside the kind; every variant carries the
/// execution-scoped identifier and, for step events, the step id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub sequence: SequenceNumber,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub execution_id: Uuid,
    pub step_id: Option<String>,
    pub message: Option<String>,
}

/// Broadcast-based event bus. Cloning shares the same underlying channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// `capacity` bounds the mailbox; a subscriber that falls more than
    /// `capacity` events behind starts missing events rather than blocking
    /// publication (spec §9 event-bus concurrency design note).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _rx) = broadcast::channel(capacity.max(1));
        Self { sender, sequence: Arc::new(AtomicU64::new(0)) }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publish one event. Never blocks: a full mailbox drops the oldest
    /// unread event for lagging subscribers rather than stalling the
    /// supervisor, matching `tokio::sync::broadcast`'s lagging semantics.
    pub fn publish(&self, kind: EventKind, execution_id: Uuid, step_id: Option<String>, message: Option<String>) {
        let sequence = SequenceNumber(self.sequence.fetch_add(1, Ordering::Relaxed));
        let event = Event { sequence, kind, timestamp: Utc::now(), execution_id, step_id, message };
        // No active subscribers is not an error: the executor runs fine
        // with zero listeners.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Spawn a task that drains `rx` and invokes `handler` for each event,
/// isolating a panicking or slow handler from the publisher. Mirrors the
/// teacher's pattern of running subscriber work off the hot path.
pub fn spawn_subscriber<F>(mut rx: broadcast::Receiver<Event>, handler: F) -> tokio::task::JoinHandle<()>
where
    F: Fn(Event) + Send + Sync + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(event)));
                    if result.is_err() {
                        tracing::warn!("event subscriber panicked; continuing");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn published_events_arrive_in_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let execution_id = Uuid::new_v4();
        bus.publish(EventKind::WorkflowStarted, execution_id, None, None);
        bus.publish(EventKind::StepStarted, execution_id, Some("a".into()), None);
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.kind.name(), "workflow.started");
        assert_eq!(second.kind.name(), "step.started");
        assert!(first.sequence < second.sequence);
    }

    #[tokio::test]
    async fn no_subscribers_does_not_error() {
        let bus = EventBus::new(16);
        bus.publish(EventKind::EngineStarted, Uuid::new_v4(), None, None);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_their_own_copy() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        bus.publish(EventKind::WorkflowCompleted, Uuid::new_v4(), None, None);
        assert_eq!(rx1.recv().await.unwrap().kind.name(), "workflow.completed");
        assert_eq!(rx2.recv().await.unwrap().kind.name(), "workflow.completed");
    }
}
