//! Migration to create the run_health table.
//!
//! Aggregate success/failure bookkeeping per (account, job kind). The
//! consecutive_errors counter drives the circuit breaker that gates
//! automatic scheduling.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RunHealth::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RunHealth::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RunHealth::TenantId).uuid().not_null())
                    .col(ColumnDef::new(RunHealth::AccountId).uuid().not_null())
                    .col(ColumnDef::new(RunHealth::JobKind).text().not_null())
                    .col(
                        ColumnDef::new(RunHealth::IsRunning)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(RunHealth::LastRunAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(RunHealth::TotalSuccessCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(RunHealth::LastSuccessCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(RunHealth::LastFailureCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(RunHealth::LastSkipCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(RunHealth::LastError).text().null())
                    .col(
                        ColumnDef::new(RunHealth::ConsecutiveErrors)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(RunHealth::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(RunHealth::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_run_health_tenant_id")
                            .from(RunHealth::Table, RunHealth::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_run_health_account_id")
                            .from(RunHealth::Table, RunHealth::AccountId)
                            .to(Accounts::Table, Accounts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_run_health_account_kind")
                    .table(RunHealth::Table)
                    .col(RunHealth::AccountId)
                    .col(RunHealth::JobKind)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_run_health_account_kind").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(RunHealth::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum RunHealth {
    Table,
    Id,
    TenantId,
    AccountId,
    JobKind,
    IsRunning,
    LastRunAt,
    TotalSuccessCount,
    LastSuccessCount,
    LastFailureCount,
    LastSkipCount,
    LastError,
    ConsecutiveErrors,
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
