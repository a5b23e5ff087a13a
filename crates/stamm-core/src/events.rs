//! Server event types and event bus for realtime notifications.
//!
//! The core publishes fire-and-forget events into a broadcast channel;
//! downstream consumers (the SSE fan-out transport, webhooks) subscribe
//! independently. The core never waits for subscriber acknowledgment, and
//! slow receivers that fall behind receive a `Lagged` error and miss events.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::Rank;

/// Domain event published to the realtime transport.
///
/// Serialized as JSON with a `type` tag field. Consumers must treat message
/// events as independent, idempotently-mergeable updates (merge by id):
/// completion order across providers is not guaranteed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// A new chat message exists (bot replies, polls).
    #[serde(rename = "message.created")]
    MessageCreated {
        message_id: Uuid,
        author_key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        question_message_id: Option<Uuid>,
    },
    /// A message changed (tagging result written, tagging failed).
    #[serde(rename = "message.updated")]
    MessageUpdated { message_id: Uuid },
    /// A poll message was created or its options changed.
    #[serde(rename = "poll.updated")]
    PollUpdated { message_id: Uuid },
    /// A member crossed a rank threshold upward.
    #[serde(rename = "rank.up")]
    RankUp {
        user_id: Uuid,
        rank: Rank,
        previous: Rank,
    },
    /// A member's taste profile aggregate was recomputed.
    #[serde(rename = "taste.updated")]
    TasteUpdated { user_id: Uuid },
    /// A queued job finished successfully.
    #[serde(rename = "job.completed")]
    JobCompleted { job_id: Uuid, queue: &'static str },
    /// A queued job exhausted its attempts.
    #[serde(rename = "job.failed")]
    JobFailed {
        job_id: Uuid,
        queue: &'static str,
        error: String,
    },
}

impl ServerEvent {
    /// Namespaced event name used on the wire.
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerEvent::MessageCreated { .. } => "message.created",
            ServerEvent::MessageUpdated { .. } => "message.updated",
            ServerEvent::PollUpdated { .. } => "poll.updated",
            ServerEvent::RankUp { .. } => "rank.up",
            ServerEvent::TasteUpdated { .. } => "taste.updated",
            ServerEvent::JobCompleted { .. } => "job.completed",
            ServerEvent::JobFailed { .. } => "job.failed",
        }
    }

    /// The primary entity this event relates to, if any.
    pub fn entity_id(&self) -> Option<Uuid> {
        match self {
            ServerEvent::MessageCreated { message_id, .. }
            | ServerEvent::MessageUpdated { message_id }
            | ServerEvent::PollUpdated { message_id } => Some(*message_id),
            ServerEvent::RankUp { user_id, .. } | ServerEvent::TasteUpdated { user_id } => {
                Some(*user_id)
            }
            ServerEvent::JobCompleted { job_id, .. } | ServerEvent::JobFailed { job_id, .. } => {
                Some(*job_id)
            }
        }
    }
}

/// Broadcast-based event bus distributing server events to consumers.
///
/// If there are no active subscribers, events are silently dropped; this is
/// by design for a fire-and-forget publish sink.
pub struct EventBus {
    tx: broadcast::Sender<ServerEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    ///
    /// Recommended: 256 for production, 32 for tests.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all subscribers, never blocking.
    pub fn publish(&self, event: ServerEvent) {
        tracing::debug!(
            event_name = event.event_name(),
            subscriber_count = self.tx.receiver_count(),
            "EventBus publish"
        );
        let _ = self.tx.send(event);
    }

    /// Subscribe to receive events. Each subscriber gets an independent stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}
