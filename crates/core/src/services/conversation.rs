//! Conversation lifecycle and read tracking.
//!
//! Serves the pull-based HTTP surface with the same participant checks
//! and unread arithmetic the live path uses, so the two can never
//! disagree about what a user may see or has read.

use kaiwa_common::{AppError, AppResult};
use kaiwa_db::{
    entities::{
        conversation::{self, ConversationKind},
        message,
    },
    repositories::{ConversationRepository, FriendRepository, MessagePage, MessageRepository,
        UserRepository},
};
use kaiwa_db::entities::friend_request::FriendStatus;
use std::collections::BTreeSet;
use tracing::info;

/// Summary of one conversation for the list endpoint.
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub conversation_id: i64,
    pub kind: ConversationKind,
    /// Resolved display name: the partner's username for private
    /// conversations, the stored name for groups.
    pub name: Option<String>,
    pub last_message: Option<message::Model>,
    pub unread_count: u64,
    pub dissolved: bool,
}

/// Conversation service.
#[derive(Clone)]
pub struct ConversationService {
    conversation_repo: ConversationRepository,
    message_repo: MessageRepository,
    user_repo: UserRepository,
    friend_repo: FriendRepository,
    history_page_size: u64,
}

impl ConversationService {
    /// Create a new conversation service.
    #[must_use]
    pub const fn new(
        conversation_repo: ConversationRepository,
        message_repo: MessageRepository,
        user_repo: UserRepository,
        friend_repo: FriendRepository,
        history_page_size: u64,
    ) -> Self {
        Self {
            conversation_repo,
            message_repo,
            user_repo,
            friend_repo,
            history_page_size,
        }
    }

    /// Get the private conversation for a user pair, creating it on first
    /// contact. Requires an accepted friendship.
    ///
    /// After an unfriend the old conversation is detached from the pair,
    /// so a re-friended pair starts over with a fresh conversation.
    pub async fn get_or_create_private(
        &self,
        user_id: i64,
        other_id: i64,
    ) -> AppResult<conversation::Model> {
        if user_id == other_id {
            return Err(AppError::BadRequest(
                "Cannot open a conversation with yourself".to_string(),
            ));
        }

        self.user_repo
            .find_by_id(other_id)
            .await?
            .ok_or_else(|| AppError::UserNotFound(other_id.to_string()))?;

        let friendship = self.friend_repo.find_pair(user_id, other_id).await?;
        if !friendship.is_some_and(|f| f.status == FriendStatus::Accepted) {
            return Err(AppError::Forbidden(
                "Private conversations require an accepted friendship".to_string(),
            ));
        }

        if let Some(existing) = self
            .conversation_repo
            .find_private_between(user_id, other_id)
            .await?
        {
            return Ok(existing);
        }

        let conv = self
            .conversation_repo
            .create_private(user_id, other_id)
            .await?;
        info!(conversation_id = conv.id, user_id, other_id, "Private conversation created");
        Ok(conv)
    }

    /// Create a group conversation. The creator is always a participant;
    /// unknown member ids are skipped.
    pub async fn create_group(
        &self,
        creator_id: i64,
        name: &str,
        member_ids: &[i64],
    ) -> AppResult<conversation::Model> {
        if name.trim().is_empty() {
            return Err(AppError::BadRequest("Group name must not be empty".to_string()));
        }
        if member_ids.is_empty() {
            return Err(AppError::BadRequest(
                "At least one participant is required".to_string(),
            ));
        }

        let mut members: BTreeSet<i64> = self
            .user_repo
            .find_by_ids(member_ids)
            .await?
            .into_iter()
            .map(|u| u.id)
            .collect();
        members.insert(creator_id);

        if members.len() < 2 {
            return Err(AppError::BadRequest(
                "A group needs at least two participants".to_string(),
            ));
        }

        let members: Vec<i64> = members.into_iter().collect();
        let conv = self
            .conversation_repo
            .create_group(creator_id, name.trim(), &members)
            .await?;
        info!(conversation_id = conv.id, creator_id, members = members.len(), "Group created");
        Ok(conv)
    }

    /// All conversations of a user with unread counts, most recently
    /// active first.
    pub async fn list(&self, user_id: i64) -> AppResult<Vec<ConversationSummary>> {
        let conversations = self.conversation_repo.find_for_user(user_id).await?;

        let mut summaries = Vec::with_capacity(conversations.len());
        for conv in conversations {
            let participant = self
                .conversation_repo
                .find_participant(conv.id, user_id)
                .await?;
            let Some(participant) = participant else {
                continue;
            };

            let unread_count = self
                .message_repo
                .count_after(conv.id, participant.read_up_to_message_id)
                .await?;
            let last_message = self.message_repo.latest(conv.id).await?;
            let name = self.display_name(&conv, user_id).await?;

            summaries.push(ConversationSummary {
                conversation_id: conv.id,
                kind: conv.kind,
                name,
                last_message,
                unread_count,
                dissolved: conv.dissolved,
            });
        }

        summaries.sort_by_key(|s| {
            std::cmp::Reverse(s.last_message.as_ref().map_or(0, |m| m.id))
        });
        Ok(summaries)
    }

    /// One page of history, newest first. Participants only.
    pub async fn history(
        &self,
        conversation_id: i64,
        user_id: i64,
        page: u64,
    ) -> AppResult<MessagePage> {
        self.conversation_repo
            .find_by_id(conversation_id)
            .await?
            .ok_or(AppError::ConversationNotFound(conversation_id))?;
        self.require_participant(conversation_id, user_id).await?;
        self.message_repo
            .find_page(conversation_id, page, self.history_page_size)
            .await
    }

    /// Advance the caller's read high-water mark to the conversation's
    /// current maximum message id. Idempotent; a conversation with no
    /// messages leaves the mark untouched.
    pub async fn mark_read(&self, conversation_id: i64, user_id: i64) -> AppResult<()> {
        self.require_participant(conversation_id, user_id).await?;

        if let Some(max_id) = self.message_repo.max_id(conversation_id).await? {
            self.conversation_repo
                .set_read_up_to(conversation_id, user_id, max_id)
                .await?;
        }
        Ok(())
    }

    /// Number of messages above the caller's read high-water mark.
    pub async fn unread_count(&self, conversation_id: i64, user_id: i64) -> AppResult<u64> {
        let participant = self.require_participant(conversation_id, user_id).await?;
        self.message_repo
            .count_after(conversation_id, participant.read_up_to_message_id)
            .await
    }

    /// Leave a conversation. The conversation and its history survive.
    pub async fn leave(&self, conversation_id: i64, user_id: i64) -> AppResult<()> {
        let conversation = self
            .conversation_repo
            .find_by_id(conversation_id)
            .await?
            .ok_or(AppError::ConversationNotFound(conversation_id))?;
        self.require_participant(conversation_id, user_id).await?;

        self.conversation_repo
            .remove_participant(conversation_id, user_id)
            .await?;

        // A private conversation with eroded membership is dead; release
        // the pair so a future re-friend starts a fresh conversation.
        if conversation.kind == ConversationKind::Private {
            self.conversation_repo
                .clear_private_members(conversation_id)
                .await?;
        }

        info!(conversation_id, user_id, "Participant left conversation");
        Ok(())
    }

    /// Remove another participant from a group. Creator only.
    pub async fn kick(
        &self,
        conversation_id: i64,
        by_user_id: i64,
        target_user_id: i64,
    ) -> AppResult<()> {
        let conversation = self.require_group_creator(conversation_id, by_user_id).await?;

        let removed = self
            .conversation_repo
            .remove_participant(conversation.id, target_user_id)
            .await?;
        if removed == 0 {
            return Err(AppError::NotFound(format!(
                "User {target_user_id} is not a participant"
            )));
        }

        info!(conversation_id, by_user_id, target_user_id, "Participant kicked");
        Ok(())
    }

    /// Close a group to new messages without deleting history. Creator only.
    pub async fn dissolve(&self, conversation_id: i64, by_user_id: i64) -> AppResult<()> {
        let conversation = self.require_group_creator(conversation_id, by_user_id).await?;
        self.conversation_repo.dissolve(conversation.id).await?;
        info!(conversation_id, by_user_id, "Group dissolved");
        Ok(())
    }

    async fn display_name(
        &self,
        conversation: &conversation::Model,
        user_id: i64,
    ) -> AppResult<Option<String>> {
        match conversation.kind {
            ConversationKind::Group => Ok(conversation.name.clone()),
            ConversationKind::Private => {
                let other_id = conversation
                    .private_pair()
                    .map(|(a, b)| if a == user_id { b } else { a });
                let Some(other_id) = other_id else {
                    return Ok(None);
                };
                Ok(self
                    .user_repo
                    .find_by_id(other_id)
                    .await?
                    .map(|u| u.username))
            }
        }
    }

    async fn require_participant(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> AppResult<kaiwa_db::entities::conversation_participant::Model> {
        self.conversation_repo
            .find_participant(conversation_id, user_id)
            .await?
            .ok_or_else(|| {
                AppError::Forbidden("Not a participant of this conversation".to_string())
            })
    }

    async fn require_group_creator(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> AppResult<conversation::Model> {
        let conversation = self
            .conversation_repo
            .find_by_id(conversation_id)
            .await?
            .ok_or(AppError::ConversationNotFound(conversation_id))?;

        if conversation.kind != ConversationKind::Group {
            return Err(AppError::BadRequest(
                "Only group conversations support this operation".to_string(),
            ));
        }
        if conversation.creator_id != Some(user_id) {
            return Err(AppError::Forbidden(
                "Only the group creator may do this".to_string(),
            ));
        }
        Ok(conversation)
    }
}
