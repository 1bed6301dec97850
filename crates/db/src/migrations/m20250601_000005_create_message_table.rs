//! Create `message` table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Message::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Message::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Message::ConversationId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Message::SenderId).big_integer().not_null())
                    .col(ColumnDef::new(Message::Content).text().not_null())
                    .col(ColumnDef::new(Message::ParentMessageId).big_integer())
                    .col(
                        ColumnDef::new(Message::IsRecalled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Message::RecalledAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Message::RecalledBy).big_integer())
                    .col(
                        ColumnDef::new(Message::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_message_conversation")
                            .from(Message::Table, Message::ConversationId)
                            .to(Conversation::Table, Conversation::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_message_sender")
                            .from(Message::Table, Message::SenderId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_message_parent")
                            .from(Message::Table, Message::ParentMessageId)
                            .to(Message::Table, Message::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        // Conversation history is always read newest-first by id
        manager
            .create_index(
                Index::create()
                    .name("idx_message_conversation_id")
                    .table(Message::Table)
                    .col(Message::ConversationId)
                    .col(Message::Id)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_message_sender")
                    .table(Message::Table)
                    .col(Message::SenderId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Message::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Message {
    Table,
    Id,
    ConversationId,
    SenderId,
    Content,
    ParentMessageId,
    IsRecalled,
    RecalledAt,
    RecalledBy,
    CreatedAt,
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
