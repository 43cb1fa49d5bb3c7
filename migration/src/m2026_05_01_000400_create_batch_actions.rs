//! Migration to create the batch_actions table.
//!
//! Append-only audit rows, one per attempted idempotent action inside a
//! batch run. The (account, action kind, target, day) uniqueness backs the
//! once-per-logical-day idempotency contract.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(BatchActions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BatchActions::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(BatchActions::TenantId).uuid().not_null())
                    .col(ColumnDef::new(BatchActions::AccountId).uuid().not_null())
                    .col(ColumnDef::new(BatchActions::ActionKind).text().not_null())
                    .col(ColumnDef::new(BatchActions::TargetId).text().not_null())
                    .col(ColumnDef::new(BatchActions::Payload).json_binary().null())
                    .col(
                        ColumnDef::new(BatchActions::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(BatchActions::SkipReason).text().null())
                    .col(ColumnDef::new(BatchActions::Error).text().null())
                    .col(ColumnDef::new(BatchActions::ActionDate).date().not_null())
                    .col(
                        ColumnDef::new(BatchActions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(BatchActions::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_batch_actions_tenant_id")
                            .from(BatchActions::Table, BatchActions::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_batch_actions_account_id")
                            .from(BatchActions::Table, BatchActions::AccountId)
                            .to(Accounts::Table, Accounts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_batch_actions_idempotency")
                    .table(BatchActions::Table)
                    .col(BatchActions::AccountId)
                    .col(BatchActions::ActionKind)
                    .col(BatchActions::TargetId)
                    .col(BatchActions::ActionDate)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_batch_actions_idempotency")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(BatchActions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum BatchActions {
    Table,
    Id,
    TenantId,
    AccountId,
    ActionKind,
    TargetId,
    Payload,
    Status,
    SkipReason,
    Error,
    ActionDate,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Accounts {
    Table,
    Id,
}
