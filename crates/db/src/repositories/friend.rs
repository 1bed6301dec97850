//! Friend relationship repository.

use crate::entities::friend_request::{
    self, Column, Entity as FriendRequest, FriendStatus, sorted_pair,
};
use chrono::Utc;
use kaiwa_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;

/// Repository for friend request operations.
#[derive(Clone)]
pub struct FriendRepository {
    db: Arc<DatabaseConnection>,
}

impl FriendRepository {
    /// Create a new friend repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find the relationship row for an unordered user pair.
    pub async fn find_pair(&self, a: i64, b: i64) -> AppResult<Option<friend_request::Model>> {
        let (lesser, greater) = sorted_pair(a, b);
        FriendRequest::find()
            .filter(Column::LesserId.eq(lesser))
            .filter(Column::GreaterId.eq(greater))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a pending request. The caller has already checked for
    /// self-pairs and an existing row.
    pub async fn create(&self, from_user_id: i64, to_user_id: i64) -> AppResult<friend_request::Model> {
        let (lesser, greater) = sorted_pair(from_user_id, to_user_id);
        let now = Utc::now();

        friend_request::ActiveModel {
            from_user_id: Set(from_user_id),
            to_user_id: Set(to_user_id),
            lesser_id: Set(lesser),
            greater_id: Set(greater),
            status: Set(FriendStatus::Pending),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Update the status of a relationship row.
    pub async fn set_status(
        &self,
        row: friend_request::Model,
        status: FriendStatus,
    ) -> AppResult<friend_request::Model> {
        let mut active: friend_request::ActiveModel = row.into();
        active.status = Set(status);
        active.updated_at = Set(Utc::now().into());
        active
            .update(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Pending requests addressed to a user.
    pub async fn list_pending_to(&self, user_id: i64) -> AppResult<Vec<friend_request::Model>> {
        FriendRequest::find()
            .filter(Column::ToUserId.eq(user_id))
            .filter(Column::Status.eq(FriendStatus::Pending))
            .order_by_desc(Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Pending requests sent by a user.
    pub async fn list_pending_from(&self, user_id: i64) -> AppResult<Vec<friend_request::Model>> {
        FriendRequest::find()
            .filter(Column::FromUserId.eq(user_id))
            .filter(Column::Status.eq(FriendStatus::Pending))
            .order_by_desc(Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Accepted relationships involving a user, in either direction.
    pub async fn list_accepted(&self, user_id: i64) -> AppResult<Vec<friend_request::Model>> {
        FriendRequest::find()
            .filter(Column::Status.eq(FriendStatus::Accepted))
            .filter(
                sea_orm::Condition::any()
                    .add(Column::FromUserId.eq(user_id))
                    .add(Column::ToUserId.eq(user_id)),
            )
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Delete the relationship row for an unordered pair.
    ///
    /// Returns the number of rows removed (0 or 1).
    pub async fn delete_pair(&self, a: i64, b: i64) -> AppResult<u64> {
        let (lesser, greater) = sorted_pair(a, b);
        let result = FriendRequest::delete_many()
            .filter(Column::LesserId.eq(lesser))
            .filter(Column::GreaterId.eq(greater))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected)
    }
}
