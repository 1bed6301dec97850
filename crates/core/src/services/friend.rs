//! Friend graph service.
//!
//! Friendships gate private conversations: the relationship row is
//! unique per unordered pair, and removing it also erodes the pair's
//! private conversation membership (the history survives).

use kaiwa_common::{AppError, AppResult};
use kaiwa_db::{
    entities::{
        conversation::ConversationKind,
        friend_request::{self, FriendStatus},
        user,
    },
    repositories::{ConversationRepository, FriendRepository, UserRepository},
};
use std::collections::HashMap;
use tracing::info;

/// One pending friend request, rendered for listing.
#[derive(Debug, Clone)]
pub struct FriendRequestView {
    pub user_id: i64,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub requested_at: chrono::DateTime<chrono::FixedOffset>,
}

/// Friend relationship service.
#[derive(Clone)]
pub struct FriendService {
    friend_repo: FriendRepository,
    user_repo: UserRepository,
    conversation_repo: ConversationRepository,
}

impl FriendService {
    /// Create a new friend service.
    #[must_use]
    pub const fn new(
        friend_repo: FriendRepository,
        user_repo: UserRepository,
        conversation_repo: ConversationRepository,
    ) -> Self {
        Self {
            friend_repo,
            user_repo,
            conversation_repo,
        }
    }

    /// Send a friend request. At most one relationship row exists per
    /// unordered pair, in any status.
    pub async fn send_request(
        &self,
        from_user_id: i64,
        to_user_id: i64,
    ) -> AppResult<friend_request::Model> {
        if from_user_id == to_user_id {
            return Err(AppError::BadRequest(
                "Cannot send a friend request to yourself".to_string(),
            ));
        }

        self.user_repo
            .find_by_id(to_user_id)
            .await?
            .ok_or_else(|| AppError::UserNotFound(to_user_id.to_string()))?;

        if self
            .friend_repo
            .find_pair(from_user_id, to_user_id)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict("Friend request already exists".to_string()));
        }

        let request = self.friend_repo.create(from_user_id, to_user_id).await?;
        info!(from_user_id, to_user_id, "Friend request sent");
        Ok(request)
    }

    /// Pending requests received by (`incoming` = true) or sent by a user.
    pub async fn pending_requests(
        &self,
        user_id: i64,
        incoming: bool,
    ) -> AppResult<Vec<FriendRequestView>> {
        let rows = if incoming {
            self.friend_repo.list_pending_to(user_id).await?
        } else {
            self.friend_repo.list_pending_from(user_id).await?
        };

        let other_ids: Vec<i64> = rows
            .iter()
            .map(|r| if incoming { r.from_user_id } else { r.to_user_id })
            .collect();
        let users: HashMap<i64, user::Model> = self
            .user_repo
            .find_by_ids(&other_ids)
            .await?
            .into_iter()
            .map(|u| (u.id, u))
            .collect();

        Ok(rows
            .into_iter()
            .map(|r| {
                let other_id = if incoming { r.from_user_id } else { r.to_user_id };
                let other = users.get(&other_id);
                FriendRequestView {
                    user_id: other_id,
                    username: other.map(|u| u.username.clone()),
                    avatar_url: other.and_then(|u| u.avatar_url.clone()),
                    requested_at: r.created_at,
                }
            })
            .collect())
    }

    /// Accept or decline a pending request addressed to `user_id`.
    pub async fn handle_request(
        &self,
        user_id: i64,
        sender_id: i64,
        accept: bool,
    ) -> AppResult<friend_request::Model> {
        let row = self
            .friend_repo
            .find_pair(user_id, sender_id)
            .await?
            .filter(|r| {
                r.status == FriendStatus::Pending
                    && r.from_user_id == sender_id
                    && r.to_user_id == user_id
            })
            .ok_or_else(|| {
                AppError::NotFound("Request not found or already handled".to_string())
            })?;

        let status = if accept {
            FriendStatus::Accepted
        } else {
            FriendStatus::Declined
        };
        let updated = self.friend_repo.set_status(row, status).await?;
        info!(user_id, sender_id, accept, "Friend request handled");
        Ok(updated)
    }

    /// All accepted friends of a user.
    pub async fn friends(&self, user_id: i64) -> AppResult<Vec<user::Model>> {
        let rows = self.friend_repo.list_accepted(user_id).await?;
        let other_ids: Vec<i64> = rows.iter().map(|r| r.other(user_id)).collect();
        self.user_repo.find_by_ids(&other_ids).await
    }

    /// Remove a friendship.
    ///
    /// Deletes the relationship row, removes the unfriended side's
    /// participant row from the shared private conversation and releases
    /// the pair. Message history is never deleted; the conversation is
    /// permanently mute until the pair re-friends into a new one.
    pub async fn unfriend(&self, user_id: i64, friend_id: i64) -> AppResult<()> {
        let removed = self.friend_repo.delete_pair(user_id, friend_id).await?;
        if removed == 0 {
            return Err(AppError::NotFound("No such friendship".to_string()));
        }

        if let Some(conv) = self
            .conversation_repo
            .find_private_between(user_id, friend_id)
            .await?
        {
            debug_assert_eq!(conv.kind, ConversationKind::Private);
            self.conversation_repo
                .remove_participant(conv.id, friend_id)
                .await?;
            self.conversation_repo.clear_private_members(conv.id).await?;
        }

        info!(user_id, friend_id, "Friendship removed");
        Ok(())
    }
}
