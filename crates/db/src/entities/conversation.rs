//! Conversation entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Kind of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(10))")]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    /// Exactly two participants, unique per unordered user pair.
    #[sea_orm(string_value = "private")]
    Private,
    /// Two or more participants, explicitly created.
    #[sea_orm(string_value = "group")]
    Group,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "conversation")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub kind: ConversationKind,

    /// Display name. Group conversations only.
    #[sea_orm(nullable)]
    pub name: Option<String>,

    /// Sorted `[lesser, greater]` user id pair. Private conversations only;
    /// a partial unique index makes the pair unique across live rows.
    #[sea_orm(nullable)]
    pub private_members: Option<Json>,

    /// Creating user. Kept when the creator's account disappears.
    #[sea_orm(nullable)]
    pub creator_id: Option<i64>,

    /// A dissolved group is closed to new messages; history is kept.
    #[sea_orm(default_value = false)]
    pub dissolved: bool,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    /// The sorted private member pair, if this is a private conversation.
    #[must_use]
    pub fn private_pair(&self) -> Option<(i64, i64)> {
        let members = self.private_members.as_ref()?.as_array()?;
        match (members.first()?.as_i64(), members.get(1)?.as_i64()) {
            (Some(a), Some(b)) => Some((a, b)),
            _ => None,
        }
    }
}

/// Encode a sorted user id pair as the `private_members` JSON value.
#[must_use]
pub fn encode_private_members(a: i64, b: i64) -> Json {
    let (lesser, greater) = if a <= b { (a, b) } else { (b, a) };
    serde_json::json!([lesser, greater])
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::conversation_participant::Entity")]
    Participants,

    #[sea_orm(has_many = "super::message::Entity")]
    Messages,
}

impl Related<super::conversation_participant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Participants.def()
    }
}

impl Related<super::message::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Messages.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
