//! Migration to create the accounts table.
//!
//! One row per (tenant, external marketplace shop). Holds the encrypted
//! access/refresh token pair and the signing key reference for that shop's
//! API credentials. The refresh-token ciphertext doubles as the
//! compare-and-swap guard for concurrent refreshes.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Accounts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Accounts::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Accounts::TenantId).uuid().not_null())
                    .col(ColumnDef::new(Accounts::ExternalId).text().not_null())
                    .col(ColumnDef::new(Accounts::DisplayName).text().null())
                    .col(
                        ColumnDef::new(Accounts::Status)
                            .text()
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(Accounts::AccessTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Accounts::RefreshTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Accounts::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Accounts::SigningKeyRef).text().null())
                    .col(ColumnDef::new(Accounts::Metadata).json_binary().null())
                    .col(
                        ColumnDef::new(Accounts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Accounts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_accounts_tenant_id")
                            .from(Accounts::Table, Accounts::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_accounts_tenant_external")
                    .table(Accounts::Table)
                    .col(Accounts::TenantId)
                    .col(Accounts::ExternalId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Expiry scans for the background refresher
        manager
            .create_index(
                Index::create()
                    .name("idx_accounts_status_expires")
                    .table(Accounts::Table)
                    .col(Accounts::Status)
                    .col(Accounts::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_accounts_tenant_external")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("idx_accounts_status_expires").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Accounts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Accounts {
    Table,
    Id,
    TenantId,
    ExternalId,
    DisplayName,
    Status,
    AccessTokenCiphertext,
    RefreshTokenCiphertext,
    ExpiresAt,
    SigningKeyRef,
    Metadata,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
}
