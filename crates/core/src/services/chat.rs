//! Fanout coordinator for the live send path.
//!
//! Orchestrates validate → persist → fan out. Persisting always
//! happens-before publishing any event that references the message, so a
//! notified client can never fetch history and miss the row. There is no
//! cross-system transaction behind the two steps: a crash after persist
//! loses only the live delivery, which clients reconcile through the
//! history endpoint on reconnect.

use crate::services::broadcast::{ChatEvent, Group, GroupBroadcastService, MessagePayload};
use crate::services::membership::MembershipService;
use chrono::Utc;
use kaiwa_common::{AppError, AppResult};
use kaiwa_db::{
    entities::{
        conversation::{self, ConversationKind},
        message,
    },
    repositories::{ConversationRepository, MessageRepository, UserRepository},
};
use sea_orm::Set;
use tracing::{debug, warn};

/// Chat send/fanout service.
#[derive(Clone)]
pub struct ChatService {
    conversation_repo: ConversationRepository,
    message_repo: MessageRepository,
    user_repo: UserRepository,
    membership: MembershipService,
    broadcast: GroupBroadcastService,
    max_message_length: usize,
}

impl ChatService {
    /// Create a new chat service.
    #[must_use]
    pub fn new(
        conversation_repo: ConversationRepository,
        message_repo: MessageRepository,
        user_repo: UserRepository,
        membership: MembershipService,
        broadcast: GroupBroadcastService,
        max_message_length: usize,
    ) -> Self {
        Self {
            conversation_repo,
            message_repo,
            user_repo,
            membership,
            broadcast,
            max_message_length,
        }
    }

    /// Send a message into a conversation and fan it out.
    ///
    /// On an authorization failure a single `blocked` event goes to the
    /// sender's own inbox group — never to the room — and nothing is
    /// persisted. Broadcast failures after a successful persist are
    /// logged and do not fail the send.
    pub async fn send(
        &self,
        conversation_id: i64,
        sender_id: i64,
        text: &str,
        parent_id: Option<i64>,
    ) -> AppResult<message::Model> {
        let content = text.trim();
        if content.is_empty() {
            return Err(AppError::BadRequest(
                "Message content must not be empty".to_string(),
            ));
        }
        if content.chars().count() > self.max_message_length {
            return Err(AppError::Validation(format!(
                "Message content exceeds {} characters",
                self.max_message_length
            )));
        }

        let conversation = self
            .conversation_repo
            .find_by_id(conversation_id)
            .await?
            .ok_or(AppError::ConversationNotFound(conversation_id))?;

        if !self
            .membership
            .authorized_to_post(&conversation, sender_id)
            .await?
        {
            let reason = blocked_reason(&conversation);
            self.publish(
                &Group::Inbox(sender_id),
                &ChatEvent::Blocked {
                    reason: reason.to_string(),
                },
            )
            .await;
            return Err(AppError::Forbidden(reason.to_string()));
        }

        let parent_id = self.resolve_parent(conversation_id, parent_id).await?;

        let sender = self
            .user_repo
            .find_by_id(sender_id)
            .await?
            .ok_or_else(|| AppError::UserNotFound(sender_id.to_string()))?;

        let persisted = self
            .message_repo
            .create(message::ActiveModel {
                conversation_id: Set(conversation_id),
                sender_id: Set(sender_id),
                content: Set(content.to_string()),
                parent_message_id: Set(parent_id),
                is_recalled: Set(false),
                recalled_at: Set(None),
                recalled_by: Set(None),
                created_at: Set(Utc::now().into()),
                ..Default::default()
            })
            .await?;

        debug!(
            message_id = persisted.id,
            conversation_id,
            sender_id,
            "Message persisted"
        );

        let recipients = self.membership.recipients(conversation_id, sender_id).await?;
        let payload = build_payload(&persisted, &sender.username);

        self.publish(
            &Group::Room(conversation_id),
            &ChatEvent::Message {
                payload: payload.clone(),
            },
        )
        .await;

        for recipient_id in recipients {
            self.publish(
                &Group::Inbox(recipient_id),
                &ChatEvent::Inbox {
                    payload: payload.clone(),
                },
            )
            .await;
        }

        Ok(persisted)
    }

    /// Mark a message as recalled. Only the sender may recall; the row
    /// stays immutable otherwise.
    pub async fn recall(&self, message_id: i64, user_id: i64) -> AppResult<()> {
        let message = self
            .message_repo
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Message not found: {message_id}")))?;

        if message.sender_id != user_id {
            return Err(AppError::Forbidden(
                "Cannot recall another user's message".to_string(),
            ));
        }

        let updated = self.message_repo.mark_recalled(message_id, user_id).await?;
        if updated == 0 {
            return Err(AppError::Conflict("Message already recalled".to_string()));
        }
        Ok(())
    }

    /// A reply link is kept only when the parent belongs to the same
    /// conversation; anything else is silently treated as absent.
    async fn resolve_parent(
        &self,
        conversation_id: i64,
        parent_id: Option<i64>,
    ) -> AppResult<Option<i64>> {
        let Some(parent_id) = parent_id else {
            return Ok(None);
        };
        Ok(self
            .message_repo
            .find_by_id(parent_id)
            .await?
            .filter(|parent| parent.conversation_id == conversation_id)
            .map(|parent| parent.id))
    }

    async fn publish(&self, group: &Group, event: &ChatEvent) {
        if let Err(e) = self.broadcast.publish(group, event).await {
            warn!(error = %e, ?group, "Failed to publish chat event");
        }
    }
}

fn blocked_reason(conversation: &conversation::Model) -> &'static str {
    match conversation.kind {
        ConversationKind::Private => "This conversation is no longer active",
        ConversationKind::Group if conversation.dissolved => "This group has been dissolved",
        ConversationKind::Group => "You are not a participant of this conversation",
    }
}

/// Build the canonical event payload for a persisted message.
#[must_use]
pub fn build_payload(message: &message::Model, sender_username: &str) -> MessagePayload {
    MessagePayload {
        id: message.id,
        conversation_id: message.conversation_id,
        sender_id: message.sender_id,
        sender_username: sender_username.to_string(),
        parent_id: message.parent_message_id.unwrap_or(0),
        content: message.content.clone(),
        timestamp_ms: message.created_at.timestamp_millis(),
        is_recalled: message.is_recalled,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::broadcast::GroupBroadcast;
    use async_trait::async_trait;
    use kaiwa_db::entities::{
        conversation::encode_private_members, conversation_participant, user,
    };
    use sea_orm::{DatabaseBackend, MockDatabase};
    use std::sync::{Arc, Mutex};
    use tokio::sync::broadcast;

    /// Records every published event; used to assert fanout shape.
    struct RecordingBroadcast {
        published: Mutex<Vec<(Group, ChatEvent)>>,
        local_tx: broadcast::Sender<(Group, ChatEvent)>,
    }

    impl RecordingBroadcast {
        fn new() -> Arc<Self> {
            let (local_tx, _) = broadcast::channel(16);
            Arc::new(Self {
                published: Mutex::new(Vec::new()),
                local_tx,
            })
        }

        fn published(&self) -> Vec<(Group, ChatEvent)> {
            self.published.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GroupBroadcast for RecordingBroadcast {
        async fn subscribe(&self, _group: &Group) -> AppResult<()> {
            Ok(())
        }

        async fn unsubscribe(&self, _group: &Group) -> AppResult<()> {
            Ok(())
        }

        async fn publish(&self, group: &Group, event: &ChatEvent) -> AppResult<()> {
            self.published.lock().unwrap().push((*group, event.clone()));
            Ok(())
        }

        fn events(&self) -> broadcast::Receiver<(Group, ChatEvent)> {
            self.local_tx.subscribe()
        }
    }

    fn private_conversation(id: i64, a: i64, b: i64) -> conversation::Model {
        conversation::Model {
            id,
            kind: ConversationKind::Private,
            name: None,
            private_members: Some(encode_private_members(a, b)),
            creator_id: Some(a),
            dissolved: false,
            created_at: Utc::now().into(),
        }
    }

    fn group_conversation(id: i64) -> conversation::Model {
        conversation::Model {
            id,
            kind: ConversationKind::Group,
            name: Some("room".to_string()),
            private_members: None,
            creator_id: Some(1),
            dissolved: false,
            created_at: Utc::now().into(),
        }
    }

    fn participant(id: i64, conversation_id: i64, user_id: i64) -> conversation_participant::Model {
        conversation_participant::Model {
            id,
            conversation_id,
            user_id,
            joined_at: Utc::now().into(),
            read_up_to_message_id: None,
        }
    }

    fn test_user(id: i64, username: &str) -> user::Model {
        user::Model {
            id,
            username: username.to_string(),
            avatar_url: None,
            created_at: Utc::now().into(),
        }
    }

    fn test_message(id: i64, conversation_id: i64, sender_id: i64, content: &str) -> message::Model {
        message::Model {
            id,
            conversation_id,
            sender_id,
            content: content.to_string(),
            parent_message_id: None,
            is_recalled: false,
            recalled_at: None,
            recalled_by: None,
            created_at: Utc::now().into(),
        }
    }

    fn service(
        db: Arc<sea_orm::DatabaseConnection>,
        broadcast: Arc<RecordingBroadcast>,
    ) -> ChatService {
        ChatService::new(
            ConversationRepository::new(db.clone()),
            MessageRepository::new(db.clone()),
            UserRepository::new(db.clone()),
            MembershipService::new(ConversationRepository::new(db)),
            broadcast,
            20_000,
        )
    }

    #[tokio::test]
    async fn test_private_send_one_room_one_inbox() {
        // Users 1 and 2 share a private conversation; 1 sends "hi"
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[private_conversation(7, 1, 2)]])
                .append_query_results([vec![participant(1, 7, 1), participant(2, 7, 2)]])
                .append_query_results([[test_user(1, "alice")]])
                .append_query_results([[test_message(10, 7, 1, "hi")]])
                .append_query_results([vec![participant(1, 7, 1), participant(2, 7, 2)]])
                .into_connection(),
        );
        let recording = RecordingBroadcast::new();
        let chat = service(db, recording.clone());

        let persisted = chat.send(7, 1, "hi", None).await.unwrap();
        assert_eq!(persisted.id, 10);

        let published = recording.published();
        assert_eq!(published.len(), 2);

        let (group, event) = &published[0];
        assert_eq!(*group, Group::Room(7));
        match event {
            ChatEvent::Message { payload } => {
                assert_eq!(payload.content, "hi");
                assert_eq!(payload.sender_username, "alice");
                assert_eq!(payload.parent_id, 0);
            }
            other => panic!("Expected room message event, got {other:?}"),
        }

        let (group, event) = &published[1];
        assert_eq!(*group, Group::Inbox(2));
        assert!(matches!(event, ChatEvent::Inbox { .. }));
    }

    #[tokio::test]
    async fn test_blocked_send_notifies_sender_inbox_only() {
        // User 2's participant row was removed; user 1 sends again
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[private_conversation(7, 1, 2)]])
                .append_query_results([vec![participant(1, 7, 1)]])
                .into_connection(),
        );
        let recording = RecordingBroadcast::new();
        let chat = service(db, recording.clone());

        let result = chat.send(7, 1, "hello?", None).await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));

        // One blocked event to the sender's own inbox, nothing to the room
        let published = recording.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, Group::Inbox(1));
        assert!(matches!(published[0].1, ChatEvent::Blocked { .. }));
    }

    #[tokio::test]
    async fn test_group_send_fans_out_to_other_members() {
        // Three members; user 1 sends; 2 and 3 get inbox events
        let members = vec![participant(1, 9, 1), participant(2, 9, 2), participant(3, 9, 3)];
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[group_conversation(9)]])
                .append_query_results([members.clone()])
                .append_query_results([[test_user(1, "alice")]])
                .append_query_results([[test_message(20, 9, 1, "hello all")]])
                .append_query_results([members])
                .into_connection(),
        );
        let recording = RecordingBroadcast::new();
        let chat = service(db, recording.clone());

        chat.send(9, 1, "hello all", None).await.unwrap();

        let published = recording.published();
        assert_eq!(published.len(), 3);
        assert_eq!(published[0].0, Group::Room(9));

        let inbox_groups: Vec<Group> = published[1..].iter().map(|(g, _)| *g).collect();
        assert!(inbox_groups.contains(&Group::Inbox(2)));
        assert!(inbox_groups.contains(&Group::Inbox(3)));
        assert!(!inbox_groups.contains(&Group::Inbox(1)));
    }

    #[tokio::test]
    async fn test_empty_text_rejected_before_any_io() {
        let db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let recording = RecordingBroadcast::new();
        let chat = service(db, recording.clone());

        let result = chat.send(7, 1, "   \n  ", None).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert!(recording.published().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_text_rejected() {
        let db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let recording = RecordingBroadcast::new();
        let chat = service(db, recording.clone());

        let text = "a".repeat(20_001);
        let result = chat.send(7, 1, &text, None).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(recording.published().is_empty());
    }

    #[tokio::test]
    async fn test_persist_failure_publishes_nothing() {
        // The store fails on insert; no event may reference the message
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[private_conversation(7, 1, 2)]])
                .append_query_results([vec![participant(1, 7, 1), participant(2, 7, 2)]])
                .append_query_results([[test_user(1, "alice")]])
                .append_query_errors([sea_orm::DbErr::Custom("connection lost".to_string())])
                .into_connection(),
        );
        let recording = RecordingBroadcast::new();
        let chat = service(db, recording.clone());

        let result = chat.send(7, 1, "hi", None).await;
        assert!(matches!(result, Err(AppError::Database(_))));
        assert!(recording.published().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_conversation() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<conversation::Model>::new()])
                .into_connection(),
        );
        let recording = RecordingBroadcast::new();
        let chat = service(db, recording.clone());

        let result = chat.send(404, 1, "hi", None).await;
        assert!(matches!(result, Err(AppError::ConversationNotFound(404))));
        assert!(recording.published().is_empty());
    }

    #[tokio::test]
    async fn test_parent_in_other_conversation_dropped() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[test_message(5, 99, 2, "elsewhere")]])
                .into_connection(),
        );
        let recording = RecordingBroadcast::new();
        let chat = service(db, recording);

        let resolved = chat.resolve_parent(7, Some(5)).await.unwrap();
        assert_eq!(resolved, None);
    }

    #[tokio::test]
    async fn test_parent_in_same_conversation_kept() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[test_message(5, 7, 2, "original")]])
                .into_connection(),
        );
        let recording = RecordingBroadcast::new();
        let chat = service(db, recording);

        let resolved = chat.resolve_parent(7, Some(5)).await.unwrap();
        assert_eq!(resolved, Some(5));
    }

    #[tokio::test]
    async fn test_recall_by_non_sender_forbidden() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[test_message(5, 7, 2, "hi")]])
                .into_connection(),
        );
        let recording = RecordingBroadcast::new();
        let chat = service(db, recording);

        let result = chat.recall(5, 1).await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[test]
    fn test_build_payload() {
        let mut message = test_message(10, 7, 1, "hi");
        message.parent_message_id = Some(3);

        let payload = build_payload(&message, "alice");
        assert_eq!(payload.id, 10);
        assert_eq!(payload.conversation_id, 7);
        assert_eq!(payload.parent_id, 3);
        assert_eq!(payload.sender_username, "alice");
        assert!(!payload.is_recalled);
        assert_eq!(payload.timestamp_ms, message.created_at.timestamp_millis());
    }
}
