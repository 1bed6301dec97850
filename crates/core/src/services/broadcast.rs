//! Group broadcast seam.
//!
//! The fanout path addresses two kinds of broadcast groups: a room group
//! per conversation (rendered by clients that have it open) and an inbox
//! group per user (notifies clients browsing elsewhere). The transport
//! behind the groups is a dependency, not reimplemented here: the core
//! only sees the [`GroupBroadcast`] trait, which is implemented in-process
//! for single-node deployments and tests, and over Redis Pub/Sub for
//! multi-process ones.

use async_trait::async_trait;
use kaiwa_common::AppResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Capacity of the local event channel behind each implementation.
pub const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Address of a broadcast group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    /// Conversation room; receives message events for display.
    Room(i64),
    /// Per-user inbox; receives cross-conversation notifications.
    Inbox(i64),
}

impl Group {
    /// Render the group as a transport channel name, e.g. `kaiwa:room:7`.
    #[must_use]
    pub fn channel(&self, prefix: &str) -> String {
        match self {
            Self::Room(id) => format!("{prefix}:room:{id}"),
            Self::Inbox(id) => format!("{prefix}:inbox:{id}"),
        }
    }

    /// Parse a transport channel name back into a group address.
    #[must_use]
    pub fn parse(prefix: &str, channel: &str) -> Option<Self> {
        let rest = channel.strip_prefix(prefix)?.strip_prefix(':')?;
        if let Some(id) = rest.strip_prefix("room:") {
            return id.parse().ok().map(Self::Room);
        }
        if let Some(id) = rest.strip_prefix("inbox:") {
            return id.parse().ok().map(Self::Inbox);
        }
        None
    }
}

/// Canonical message payload carried by room and inbox events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub sender_username: String,
    /// Reply target, `0` when the message is not a reply.
    pub parent_id: i64,
    pub content: String,
    /// Creation time as epoch milliseconds.
    pub timestamp_ms: i64,
    pub is_recalled: bool,
}

/// Event delivered through a broadcast group.
///
/// A closed enumeration: room groups carry `message`, inbox groups carry
/// `inbox` and `blocked`. The two group kinds have different consumption
/// semantics (render vs. notify) and are never merged into one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChatEvent {
    /// A new message, delivered to the conversation room.
    Message { payload: MessagePayload },
    /// A new message, delivered to a recipient's inbox.
    Inbox { payload: MessagePayload },
    /// A rejected send, delivered only to the sender's own inbox.
    Blocked { reason: String },
}

/// Trait for the group broadcast transport.
///
/// Constructed once and injected, so tests can substitute a recording
/// double. Delivery is at-least-once per still-subscribed receiver; no
/// ordering is guaranteed across processes.
#[async_trait]
pub trait GroupBroadcast: Send + Sync {
    /// Join a group. Joining an already-joined group is a no-op.
    async fn subscribe(&self, group: &Group) -> AppResult<()>;

    /// Leave a group. Safe to call for groups never joined.
    async fn unsubscribe(&self, group: &Group) -> AppResult<()>;

    /// Send an event to every current member of a group.
    async fn publish(&self, group: &Group, event: &ChatEvent) -> AppResult<()>;

    /// Receiver for events delivered to this process. Each connection
    /// holds its own receiver and filters by the groups it joined.
    fn events(&self) -> broadcast::Receiver<(Group, ChatEvent)>;
}

/// Shared handle to the configured broadcast implementation.
pub type GroupBroadcastService = Arc<dyn GroupBroadcast>;

/// In-process broadcast for single-node deployments and tests.
///
/// Group membership is implicit: every event reaches every local receiver
/// tagged with its group, and receivers filter. This matches the
/// at-least-once contract of the seam.
pub struct InProcessBroadcast {
    local_tx: broadcast::Sender<(Group, ChatEvent)>,
}

impl InProcessBroadcast {
    /// Create a new in-process broadcast.
    #[must_use]
    pub fn new() -> Self {
        let (local_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { local_tx }
    }
}

impl Default for InProcessBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GroupBroadcast for InProcessBroadcast {
    async fn subscribe(&self, _group: &Group) -> AppResult<()> {
        Ok(())
    }

    async fn unsubscribe(&self, _group: &Group) -> AppResult<()> {
        Ok(())
    }

    async fn publish(&self, group: &Group, event: &ChatEvent) -> AppResult<()> {
        // A send error only means no receiver is currently subscribed
        let _ = self.local_tx.send((*group, event.clone()));
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<(Group, ChatEvent)> {
        self.local_tx.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn payload() -> MessagePayload {
        MessagePayload {
            id: 10,
            conversation_id: 7,
            sender_id: 1,
            sender_username: "alice".to_string(),
            parent_id: 0,
            content: "hi".to_string(),
            timestamp_ms: 1_700_000_000_000,
            is_recalled: false,
        }
    }

    #[test]
    fn test_channel_names() {
        assert_eq!(Group::Room(7).channel("kaiwa"), "kaiwa:room:7");
        assert_eq!(Group::Inbox(42).channel("kaiwa"), "kaiwa:inbox:42");
    }

    #[test]
    fn test_channel_parse_roundtrip() {
        for group in [Group::Room(7), Group::Inbox(42)] {
            let channel = group.channel("kaiwa");
            assert_eq!(Group::parse("kaiwa", &channel), Some(group));
        }
        assert_eq!(Group::parse("kaiwa", "other:room:7"), None);
        assert_eq!(Group::parse("kaiwa", "kaiwa:room:abc"), None);
        assert_eq!(Group::parse("kaiwa", "kaiwa:timeline:7"), None);
    }

    #[test]
    fn test_event_serialization() {
        let event = ChatEvent::Message { payload: payload() };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"message\""));
        assert!(json.contains("\"content\":\"hi\""));

        let parsed: ChatEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_blocked_event_serialization() {
        let event = ChatEvent::Blocked {
            reason: "not a participant".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"blocked\""));

        let parsed: ChatEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[tokio::test]
    async fn test_in_process_delivery() {
        let broadcast = InProcessBroadcast::new();
        let mut rx = broadcast.events();

        let group = Group::Room(7);
        let event = ChatEvent::Message { payload: payload() };
        broadcast.publish(&group, &event).await.unwrap();

        let (got_group, got_event) = rx.recv().await.unwrap();
        assert_eq!(got_group, group);
        assert_eq!(got_event, event);
    }

    #[tokio::test]
    async fn test_publish_without_receivers_is_ok() {
        let broadcast = InProcessBroadcast::new();
        let event = ChatEvent::Blocked {
            reason: "x".to_string(),
        };
        assert!(broadcast.publish(&Group::Inbox(1), &event).await.is_ok());
    }
}
