//! Test utilities for database testing.
//!
//! Sets up in-memory SQLite databases with migrations applied, plus
//! fixture helpers for tenants, accounts, and jobs.

use anyhow::Result;
use chrono::{DateTime, Utc};
use marketsync::crypto::CryptoKey;
use marketsync::models::{account, tenant};
use marketsync::repositories::AccountRepository;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, ConnectionTrait, Database, DatabaseConnection, Set, Statement};
use std::sync::Arc;
use uuid::Uuid;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;

    Migrator::up(&db, None).await?;

    // SQLite does not enforce our Postgres foreign key semantics; disable FK
    // checks so fixtures can be inserted without full relation graphs.
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = OFF".to_string(),
    ))
    .await?;

    Ok(db)
}

/// Sets up an in-memory SQLite database and returns it Arc-wrapped.
pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    let db = setup_test_db().await?;
    Ok(Arc::new(db))
}

/// All-zero 32-byte key; fine for tests, never for production.
#[allow(dead_code)]
pub fn test_crypto_key() -> CryptoKey {
    CryptoKey::new(vec![0u8; 32]).expect("32-byte test key")
}

/// Creates a test tenant row, returning its id.
#[allow(dead_code)]
pub async fn create_test_tenant(
    db: &DatabaseConnection,
    tenant_id: Option<Uuid>,
) -> Result<Uuid> {
    let id = tenant_id.unwrap_or_else(Uuid::new_v4);
    let now = Utc::now();

    tenant::ActiveModel {
        id: Set(id),
        name: Set(Some(format!("tenant-{}", &id.to_string()[..8]))),
        created_at: Set(now.into()),
    }
    .insert(db)
    .await?;

    Ok(id)
}

/// Creates an active account with encrypted tokens, returning the model.
#[allow(dead_code)]
pub async fn create_test_account(
    db: &Arc<DatabaseConnection>,
    tenant_id: Uuid,
    external_id: &str,
    access_token: Option<&str>,
    refresh_token: Option<&str>,
    expires_at: Option<DateTime<Utc>>,
) -> Result<account::Model> {
    let repo = AccountRepository::new(Arc::clone(db), test_crypto_key());
    let model = repo
        .create_with_tokens(
            tenant_id,
            external_id,
            None,
            access_token,
            refresh_token,
            expires_at,
            None,
        )
        .await?;
    Ok(model)
}
