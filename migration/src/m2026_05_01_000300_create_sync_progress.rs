//! Migration to create the sync_progress table.
//!
//! One row per (account, sync kind) in-flight run. Chunk invocations report
//! into this row; the run terminates once every planned chunk has reported.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncProgress::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncProgress::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncProgress::TenantId).uuid().not_null())
                    .col(ColumnDef::new(SyncProgress::AccountId).uuid().not_null())
                    .col(ColumnDef::new(SyncProgress::SyncKind).text().not_null())
                    .col(
                        ColumnDef::new(SyncProgress::TotalUnits)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncProgress::UnitsCompleted)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncProgress::ChunkSize)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncProgress::TotalChunks)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncProgress::ChunksReported)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncProgress::Stage)
                            .text()
                            .not_null()
                            .default("idle"),
                    )
                    .col(
                        ColumnDef::new(SyncProgress::FailedChunks)
                            .json_binary()
                            .null(),
                    )
                    .col(ColumnDef::new(SyncProgress::LastError).text().null())
                    .col(
                        ColumnDef::new(SyncProgress::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncProgress::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncProgress::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncProgress::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sync_progress_tenant_id")
                            .from(SyncProgress::Table, SyncProgress::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sync_progress_account_id")
                            .from(SyncProgress::Table, SyncProgress::AccountId)
                            .to(Accounts::Table, Accounts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One in-flight run per (account, kind); terminal rows keep history
        // via the stage column, lookups go through this pair.
        manager
            .create_index(
                Index::create()
                    .name("idx_sync_progress_account_kind")
                    .table(SyncProgress::Table)
                    .col(SyncProgress::AccountId)
                    .col(SyncProgress::SyncKind)
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
                    .name("idx_sync_progress_account_kind")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(SyncProgress::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncProgress {
    Table,
    Id,
    TenantId,
    AccountId,
    SyncKind,
    TotalUnits,
    UnitsCompleted,
    ChunkSize,
    TotalChunks,
    ChunksReported,
    Stage,
    FailedChunks,
    LastError,
    StartedAt,
    FinishedAt,
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
