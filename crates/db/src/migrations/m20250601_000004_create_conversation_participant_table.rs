//! Create `conversation_participant` table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ConversationParticipant::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ConversationParticipant::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ConversationParticipant::ConversationId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConversationParticipant::UserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConversationParticipant::JoinedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(ConversationParticipant::ReadUpToMessageId).big_integer())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_participant_conversation")
                            .from(
                                ConversationParticipant::Table,
                                ConversationParticipant::ConversationId,
                            )
                            .to(Conversation::Table, Conversation::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_participant_user")
                            .from(
                                ConversationParticipant::Table,
                                ConversationParticipant::UserId,
                            )
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One participant row per (user, conversation)
        manager
            .create_index(
                Index::create()
                    .name("uniq_participant_user_conversation")
                    .table(ConversationParticipant::Table)
                    .col(ConversationParticipant::UserId)
                    .col(ConversationParticipant::ConversationId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_participant_conversation")
                    .table(ConversationParticipant::Table)
                    .col(ConversationParticipant::ConversationId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(ConversationParticipant::Table)
                    .to_owned(),
            )
            .await
    }
}

#[derive(Iden)]
enum ConversationParticipant {
    Table,
    Id,
    ConversationId,
    UserId,
    JoinedAt,
    ReadUpToMessageId,
}

#[derive(Iden)]
enum Conversation {
    Table,
    Id,
}

#[derive(Iden)]
enum User {
    Table,
    Id,
}
