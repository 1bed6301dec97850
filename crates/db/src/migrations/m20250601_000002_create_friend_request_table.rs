//! Create `friend_request` table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(FriendRequest::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FriendRequest::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(FriendRequest::FromUserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FriendRequest::ToUserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FriendRequest::LesserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FriendRequest::GreaterId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FriendRequest::Status)
                            .string_len(10)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FriendRequest::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(FriendRequest::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // One relationship row per unordered pair
        manager
            .create_index(
                Index::create()
                    .name("uniq_friend_request_pair")
                    .table(FriendRequest::Table)
                    .col(FriendRequest::LesserId)
                    .col(FriendRequest::GreaterId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_friend_request_from_status")
                    .table(FriendRequest::Table)
                    .col(FriendRequest::FromUserId)
                    .col(FriendRequest::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_friend_request_to_status")
                    .table(FriendRequest::Table)
                    .col(FriendRequest::ToUserId)
                    .col(FriendRequest::Status)
                    .to_owned(),
            )
            .await?;

        // Self-pairs are also rejected at the service layer
        manager
            .get_connection()
            .execute_unprepared(
                "ALTER TABLE friend_request ADD CONSTRAINT chk_friend_request_no_self \
                 CHECK (from_user_id <> to_user_id);",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(FriendRequest::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum FriendRequest {
    Table,
    Id,
    FromUserId,
    ToUserId,
    LesserId,
    GreaterId,
    Status,
    CreatedAt,
    UpdatedAt,
}
