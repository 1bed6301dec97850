//! Message entity.
//!
//! Message ids come from a global bigserial sequence, so they increase
//! monotonically within every conversation and double as the read
//! high-water-mark unit. Rows are immutable once created except for
//! recall marking.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "message")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(indexed)]
    pub conversation_id: i64,

    #[sea_orm(indexed)]
    pub sender_id: i64,

    #[sea_orm(column_type = "Text")]
    pub content: String,

    /// Reply link to an earlier message in the same conversation.
    #[sea_orm(nullable)]
    pub parent_message_id: Option<i64>,

    #[sea_orm(default_value = false)]
    pub is_recalled: bool,

    #[sea_orm(nullable)]
    pub recalled_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(nullable)]
    pub recalled_by: Option<i64>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::conversation::Entity",
        from = "Column::ConversationId",
        to = "super::conversation::Column::Id",
        on_delete = "Cascade"
    )]
    Conversation,

    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::SenderId",
        to = "super::user::Column::Id"
    )]
    Sender,

    #[sea_orm(
        belongs_to = "Entity",
        from = "Column::ParentMessageId",
        to = "Column::Id",
        on_delete = "SetNull"
    )]
    Parent,
}

impl Related<super::conversation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Conversation.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sender.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
