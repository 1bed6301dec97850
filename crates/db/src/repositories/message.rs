//! Message repository.

use crate::entities::message::{self, ActiveModel, Column, Entity as Message};
use chrono::Utc;
use kaiwa_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, sea_query::Expr,
};
use std::sync::Arc;

/// One page of conversation history, newest first.
#[derive(Debug, Clone)]
pub struct MessagePage {
    /// Messages on this page.
    pub messages: Vec<message::Model>,
    /// 1-based page number actually served.
    pub current_page: u64,
    /// Total number of pages.
    pub total_pages: u64,
}

/// Repository for message operations.
#[derive(Clone)]
pub struct MessageRepository {
    db: Arc<DatabaseConnection>,
}

impl MessageRepository {
    /// Create a new message repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Persist a new message.
    pub async fn create(&self, model: ActiveModel) -> AppResult<message::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find a message by ID.
    pub async fn find_by_id(&self, id: i64) -> AppResult<Option<message::Model>> {
        Message::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// One page of a conversation's history, newest first. `page` is
    /// 1-based; out-of-range pages clamp to the last page.
    pub async fn find_page(
        &self,
        conversation_id: i64,
        page: u64,
        page_size: u64,
    ) -> AppResult<MessagePage> {
        let paginator = Message::find()
            .filter(Column::ConversationId.eq(conversation_id))
            .order_by_desc(Column::Id)
            .paginate(self.db.as_ref(), page_size);

        let total_pages = paginator
            .num_pages()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let current_page = page.max(1).min(total_pages.max(1));
        let messages = paginator
            .fetch_page(current_page - 1)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(MessagePage {
            messages,
            current_page,
            total_pages,
        })
    }

    /// The newest message of a conversation.
    pub async fn latest(&self, conversation_id: i64) -> AppResult<Option<message::Model>> {
        Message::find()
            .filter(Column::ConversationId.eq(conversation_id))
            .order_by_desc(Column::Id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// The largest message id of a conversation, if it has any messages.
    pub async fn max_id(&self, conversation_id: i64) -> AppResult<Option<i64>> {
        Ok(self.latest(conversation_id).await?.map(|m| m.id))
    }

    /// Number of messages above a read high-water mark. A `None` mark
    /// counts every message.
    pub async fn count_after(
        &self,
        conversation_id: i64,
        after: Option<i64>,
    ) -> AppResult<u64> {
        let mut query = Message::find().filter(Column::ConversationId.eq(conversation_id));
        if let Some(after) = after {
            query = query.filter(Column::Id.gt(after));
        }
        query
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Mark a message as recalled. Content stays immutable otherwise.
    ///
    /// Returns the number of rows updated (0 when already recalled or absent).
    pub async fn mark_recalled(&self, message_id: i64, recalled_by: i64) -> AppResult<u64> {
        let result = Message::update_many()
            .col_expr(Column::IsRecalled, Expr::value(true))
            .col_expr(Column::RecalledAt, Expr::value(Utc::now()))
            .col_expr(Column::RecalledBy, Expr::value(recalled_by))
            .filter(Column::Id.eq(message_id))
            .filter(Column::IsRecalled.eq(false))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected)
    }
}
