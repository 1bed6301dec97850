//! Create `conversation` table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Conversation::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Conversation::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Conversation::Kind).string_len(10).not_null())
                    .col(ColumnDef::new(Conversation::Name).string_len(255))
                    .col(ColumnDef::new(Conversation::PrivateMembers).json_binary())
                    .col(ColumnDef::new(Conversation::CreatorId).big_integer())
                    .col(
                        ColumnDef::new(Conversation::Dissolved)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Conversation::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_conversation_creator")
                            .from(Conversation::Table, Conversation::CreatorId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        // A private conversation must carry its sorted member pair, and the
        // pair is unique across private conversations. Partial indexes and
        // check constraints need raw SQL.
        manager
            .get_connection()
            .execute_unprepared(
                "ALTER TABLE conversation ADD CONSTRAINT chk_conversation_private_members \
                 CHECK (kind <> 'private' OR jsonb_array_length(private_members) = 2);",
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                "CREATE UNIQUE INDEX uniq_conversation_private_pair \
                 ON conversation (private_members) WHERE kind = 'private';",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Conversation::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Conversation {
    Table,
    Id,
    Kind,
    Name,
    PrivateMembers,
    CreatorId,
    Dissolved,
    CreatedAt,
}

#[derive(Iden)]
enum User {
    Table,
    Id,
}
