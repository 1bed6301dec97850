//! Conversation and participant repository.

use crate::entities::{
    conversation::{self, ConversationKind, Entity as Conversation, encode_private_members},
    conversation_participant::{self, Entity as Participant},
};
use chrono::Utc;
use kaiwa_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, JoinType, QueryFilter,
    QueryOrder, QuerySelect, RelationTrait, Set, sea_query::Expr,
};
use std::sync::Arc;

/// Repository for conversation and participant operations.
#[derive(Clone)]
pub struct ConversationRepository {
    db: Arc<DatabaseConnection>,
}

impl ConversationRepository {
    /// Create a new conversation repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a conversation by ID.
    pub async fn find_by_id(&self, id: i64) -> AppResult<Option<conversation::Model>> {
        Conversation::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find the private conversation for an unordered user pair, if any.
    pub async fn find_private_between(
        &self,
        a: i64,
        b: i64,
    ) -> AppResult<Option<conversation::Model>> {
        Conversation::find()
            .filter(conversation::Column::Kind.eq(ConversationKind::Private))
            .filter(conversation::Column::PrivateMembers.eq(encode_private_members(a, b)))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a private conversation between two users, with both
    /// participant rows.
    pub async fn create_private(
        &self,
        creator_id: i64,
        other_id: i64,
    ) -> AppResult<conversation::Model> {
        let now = Utc::now();

        let conv = conversation::ActiveModel {
            kind: Set(ConversationKind::Private),
            name: Set(None),
            private_members: Set(Some(encode_private_members(creator_id, other_id))),
            creator_id: Set(Some(creator_id)),
            dissolved: Set(false),
            created_at: Set(now.into()),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        for user_id in [creator_id, other_id] {
            self.add_participant(conv.id, user_id).await?;
        }

        Ok(conv)
    }

    /// Create a group conversation. `member_ids` must already contain the
    /// creator and be deduplicated.
    pub async fn create_group(
        &self,
        creator_id: i64,
        name: &str,
        member_ids: &[i64],
    ) -> AppResult<conversation::Model> {
        let now = Utc::now();

        let conv = conversation::ActiveModel {
            kind: Set(ConversationKind::Group),
            name: Set(Some(name.to_string())),
            private_members: Set(None),
            creator_id: Set(Some(creator_id)),
            dissolved: Set(false),
            created_at: Set(now.into()),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        for &user_id in member_ids {
            self.add_participant(conv.id, user_id).await?;
        }

        Ok(conv)
    }

    /// All conversations a user participates in, newest first.
    pub async fn find_for_user(&self, user_id: i64) -> AppResult<Vec<conversation::Model>> {
        Conversation::find()
            .join(JoinType::InnerJoin, conversation::Relation::Participants.def())
            .filter(conversation_participant::Column::UserId.eq(user_id))
            .order_by_desc(conversation::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// All participant rows of a conversation.
    pub async fn participants(
        &self,
        conversation_id: i64,
    ) -> AppResult<Vec<conversation_participant::Model>> {
        Participant::find()
            .filter(conversation_participant::Column::ConversationId.eq(conversation_id))
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find one participant row.
    pub async fn find_participant(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> AppResult<Option<conversation_participant::Model>> {
        Participant::find()
            .filter(conversation_participant::Column::ConversationId.eq(conversation_id))
            .filter(conversation_participant::Column::UserId.eq(user_id))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Add a participant row.
    pub async fn add_participant(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> AppResult<conversation_participant::Model> {
        conversation_participant::ActiveModel {
            conversation_id: Set(conversation_id),
            user_id: Set(user_id),
            joined_at: Set(Utc::now().into()),
            read_up_to_message_id: Set(None),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Remove a participant row. The conversation and its messages survive.
    ///
    /// Returns the number of rows removed (0 or 1).
    pub async fn remove_participant(&self, conversation_id: i64, user_id: i64) -> AppResult<u64> {
        let result = Participant::delete_many()
            .filter(conversation_participant::Column::ConversationId.eq(conversation_id))
            .filter(conversation_participant::Column::UserId.eq(user_id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected)
    }

    /// Advance a participant's read high-water mark.
    ///
    /// The mark only ever moves forward; repeating a call with the same
    /// value is a no-op.
    pub async fn set_read_up_to(
        &self,
        conversation_id: i64,
        user_id: i64,
        up_to: i64,
    ) -> AppResult<u64> {
        let result = Participant::update_many()
            .col_expr(
                conversation_participant::Column::ReadUpToMessageId,
                Expr::value(up_to),
            )
            .filter(conversation_participant::Column::ConversationId.eq(conversation_id))
            .filter(conversation_participant::Column::UserId.eq(user_id))
            .filter(
                sea_orm::Condition::any()
                    .add(conversation_participant::Column::ReadUpToMessageId.is_null())
                    .add(conversation_participant::Column::ReadUpToMessageId.lt(up_to)),
            )
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected)
    }

    /// Detach a private conversation from its member pair.
    ///
    /// Called when membership erodes: the dead conversation keeps its
    /// history but releases the pair, so re-friending can start a fresh
    /// conversation without tripping the pair uniqueness index.
    pub async fn clear_private_members(&self, conversation_id: i64) -> AppResult<u64> {
        let result = Conversation::update_many()
            .col_expr(
                conversation::Column::PrivateMembers,
                Expr::value(Option::<serde_json::Value>::None),
            )
            .filter(conversation::Column::Id.eq(conversation_id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected)
    }

    /// Mark a group conversation as dissolved. History is kept.
    pub async fn dissolve(&self, conversation_id: i64) -> AppResult<u64> {
        let result = Conversation::update_many()
            .col_expr(conversation::Column::Dissolved, Expr::value(true))
            .filter(conversation::Column::Id.eq(conversation_id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected)
    }
}
