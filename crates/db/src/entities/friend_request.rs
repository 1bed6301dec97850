//! Friend request entity.
//!
//! One row per unordered user pair; `lesser_id`/`greater_id` hold the
//! sorted pair so uniqueness is direction-independent.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Status of a friend relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(10))")]
#[serde(rename_all = "lowercase")]
pub enum FriendStatus {
    /// Awaiting a response from the receiver.
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Accepted; the pair may open a private conversation.
    #[sea_orm(string_value = "accepted")]
    Accepted,
    /// Declined by the receiver.
    #[sea_orm(string_value = "declined")]
    Declined,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "friend_request")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// The user who initiated the request.
    #[sea_orm(indexed)]
    pub from_user_id: i64,

    /// The user who received the request.
    #[sea_orm(indexed)]
    pub to_user_id: i64,

    /// Smaller id of the pair. Unique together with `greater_id`.
    #[sea_orm(indexed)]
    pub lesser_id: i64,

    /// Larger id of the pair.
    #[sea_orm(indexed)]
    pub greater_id: i64,

    pub status: FriendStatus,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// The other user of the pair, from `user_id`'s point of view.
    #[must_use]
    pub const fn other(&self, user_id: i64) -> i64 {
        if self.from_user_id == user_id {
            self.to_user_id
        } else {
            self.from_user_id
        }
    }
}

/// Sort a pair of user ids into `(lesser, greater)`.
#[must_use]
pub const fn sorted_pair(a: i64, b: i64) -> (i64, i64) {
    if a <= b { (a, b) } else { (b, a) }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_pair() {
        assert_eq!(sorted_pair(2, 1), (1, 2));
        assert_eq!(sorted_pair(1, 2), (1, 2));
        assert_eq!(sorted_pair(5, 5), (5, 5));
    }
}
