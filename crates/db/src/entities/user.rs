//! User entity.
//!
//! Owned by the account subsystem; the chat core only ever reads these
//! rows (sender display names, friend lists) and never mutates them.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(unique)]
    pub username: String,

    /// Avatar URL
    #[sea_orm(nullable)]
    pub avatar_url: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::conversation_participant::Entity")]
    Participations,

    #[sea_orm(has_many = "super::message::Entity")]
    SentMessages,
}

impl Related<super::conversation_participant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Participations.def()
    }
}

impl Related<super::message::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SentMessages.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
