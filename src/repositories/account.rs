//! Account repository for credential storage.
//!
//! Encapsulates SeaORM operations for the accounts table. Tokens are
//! encrypted before hitting the database; the refresh path uses optimistic
//! concurrency keyed on the previously-read refresh token ciphertext so
//! racing refreshers cannot clobber each other.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

use crate::crypto::{CryptoKey, decrypt_account_tokens, encrypt_account_tokens};
use crate::error::MarketError;
use crate::models::account::{self, Entity as Account};

/// Decrypted credential material for an account.
#[derive(Debug, Clone)]
pub struct DecryptedCredential {
    pub account_id: Uuid,
    pub tenant_id: Uuid,
    pub external_id: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub signing_key_ref: Option<String>,
    /// Ciphertext of the refresh token as read, used as the CAS witness
    /// when persisting a refreshed pair.
    pub refresh_token_ciphertext: Option<Vec<u8>>,
}

/// Repository for account database operations
#[derive(Debug, Clone)]
pub struct AccountRepository {
    pub db: Arc<DatabaseConnection>,
    pub crypto_key: CryptoKey,
}

impl AccountRepository {
    /// Creates a new AccountRepository instance
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    /// Fetch an account by id.
    pub async fn get_by_id(&self, account_id: Uuid) -> Result<Option<account::Model>, MarketError> {
        Ok(Account::find_by_id(account_id).one(&*self.db).await?)
    }

    /// Fetch an account scoped to a tenant.
    pub async fn get_by_tenant(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> Result<Option<account::Model>, MarketError> {
        Ok(Account::find_by_id(account_id)
            .filter(account::Column::TenantId.eq(tenant_id))
            .one(&*self.db)
            .await?)
    }

    /// List accounts for a tenant, newest first.
    pub async fn list_by_tenant(
        &self,
        tenant_id: Uuid,
        status: Option<&str>,
    ) -> Result<Vec<account::Model>, MarketError> {
        let mut query = Account::find()
            .filter(account::Column::TenantId.eq(tenant_id))
            .order_by_desc(account::Column::CreatedAt);

        if let Some(status) = status {
            query = query.filter(account::Column::Status.eq(status));
        }

        Ok(query.all(&*self.db).await?)
    }

    /// List active accounts across all tenants (engine-internal scheduling).
    pub async fn list_active(&self) -> Result<Vec<account::Model>, MarketError> {
        Ok(Account::find()
            .filter(account::Column::Status.eq(account::status::ACTIVE))
            .order_by_asc(account::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// List active accounts whose access token expires before `deadline`,
    /// for the background refresher.
    pub async fn list_expiring_before(
        &self,
        deadline: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<account::Model>, MarketError> {
        Ok(Account::find()
            .filter(account::Column::Status.eq(account::status::ACTIVE))
            .filter(account::Column::ExpiresAt.is_not_null())
            .filter(account::Column::ExpiresAt.lte(deadline))
            .order_by_asc(account::Column::ExpiresAt)
            .limit(limit)
            .all(&*self.db)
            .await?)
    }

    /// Create an account, encrypting the initial token pair.
    pub async fn create_with_tokens(
        &self,
        tenant_id: Uuid,
        external_id: &str,
        display_name: Option<String>,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
        signing_key_ref: Option<String>,
    ) -> Result<account::Model, MarketError> {
        let now = Utc::now();
        let id = Uuid::new_v4();

        // Stub model carrying the AAD inputs (tenant + external id).
        let aad_model = account::Model {
            id,
            tenant_id,
            external_id: external_id.to_string(),
            display_name: None,
            status: account::status::ACTIVE.to_string(),
            access_token_ciphertext: None,
            refresh_token_ciphertext: None,
            expires_at: None,
            signing_key_ref: None,
            metadata: None,
            created_at: now.into(),
            updated_at: now.into(),
        };

        let (access_ct, refresh_ct) =
            encrypt_account_tokens(&self.crypto_key, &aad_model, access_token, refresh_token)
                .map_err(|e| MarketError::Crypto(e.to_string()))?;

        let active = account::ActiveModel {
            id: Set(id),
            tenant_id: Set(tenant_id),
            external_id: Set(external_id.to_string()),
            display_name: Set(display_name),
            status: Set(account::status::ACTIVE.to_string()),
            access_token_ciphertext: Set(access_ct),
            refresh_token_ciphertext: Set(refresh_ct),
            expires_at: Set(expires_at.map(Into::into)),
            signing_key_ref: Set(signing_key_ref),
            metadata: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        active.insert(&*self.db).await?;

        // Read back for SQLite compatibility with non-returning inserts.
        let fetched = Account::find_by_id(id).one(&*self.db).await?;
        fetched.ok_or_else(|| MarketError::Db(sea_orm::DbErr::RecordNotFound(id.to_string())))
    }

    /// Decrypt the stored credential for an account.
    pub fn decrypt(&self, model: &account::Model) -> Result<DecryptedCredential, MarketError> {
        let (access_token, refresh_token) = decrypt_account_tokens(&self.crypto_key, model)
            .map_err(|e| {
                tracing::error!(
                    tenant_id = %model.tenant_id,
                    external_id = %model.external_id,
                    "Token decryption failed"
                );
                MarketError::Crypto(e.to_string())
            })?;

        Ok(DecryptedCredential {
            account_id: model.id,
            tenant_id: model.tenant_id,
            external_id: model.external_id.clone(),
            access_token,
            refresh_token,
            expires_at: model.expires_at.map(|ts| ts.with_timezone(&Utc)),
            signing_key_ref: model.signing_key_ref.clone(),
            refresh_token_ciphertext: model.refresh_token_ciphertext.clone(),
        })
    }

    /// Persist a refreshed token pair, committing only if the stored refresh
    /// token ciphertext still matches what the refresher originally read.
    ///
    /// Returns `true` when the row was updated, `false` when a concurrent
    /// refresher won the race (the caller should re-read the credential).
    pub async fn commit_refreshed_tokens(
        &self,
        account: &account::Model,
        witness_refresh_ciphertext: Option<&[u8]>,
        new_access_token: &str,
        new_refresh_token: Option<&str>,
        new_expires_at: DateTime<Utc>,
    ) -> Result<bool, MarketError> {
        let (access_ct, refresh_ct) = encrypt_account_tokens(
            &self.crypto_key,
            account,
            Some(new_access_token),
            new_refresh_token,
        )
        .map_err(|e| MarketError::Crypto(e.to_string()))?;

        let mut update = Account::update_many()
            .col_expr(
                account::Column::AccessTokenCiphertext,
                sea_orm::sea_query::Expr::value(access_ct),
            )
            .col_expr(
                account::Column::ExpiresAt,
                sea_orm::sea_query::Expr::value(
                    sea_orm::prelude::DateTimeWithTimeZone::from(new_expires_at),
                ),
            )
            .col_expr(
                account::Column::Status,
                sea_orm::sea_query::Expr::value(account::status::ACTIVE),
            )
            .col_expr(
                account::Column::UpdatedAt,
                sea_orm::sea_query::Expr::value(sea_orm::prelude::DateTimeWithTimeZone::from(
                    Utc::now(),
                )),
            )
            .filter(account::Column::Id.eq(account.id));

        // Platforms that rotate refresh tokens hand back a new one; keep the
        // old ciphertext when they don't.
        if let Some(ct) = refresh_ct {
            update = update.col_expr(
                account::Column::RefreshTokenCiphertext,
                sea_orm::sea_query::Expr::value(ct),
            );
        }

        // The CAS witness: only overwrite if nobody refreshed since we read.
        update = match witness_refresh_ciphertext {
            Some(witness) => {
                update.filter(account::Column::RefreshTokenCiphertext.eq(witness.to_vec()))
            }
            None => update.filter(account::Column::RefreshTokenCiphertext.is_null()),
        };

        let result = update.exec(&*self.db).await?;
        Ok(result.rows_affected > 0)
    }

    /// Transition an account's status (e.g., to reauth_required).
    pub async fn set_status(&self, account_id: Uuid, status: &str) -> Result<(), MarketError> {
        Account::update_many()
            .col_expr(
                account::Column::Status,
                sea_orm::sea_query::Expr::value(status),
            )
            .col_expr(
                account::Column::UpdatedAt,
                sea_orm::sea_query::Expr::value(sea_orm::prelude::DateTimeWithTimeZone::from(
                    Utc::now(),
                )),
            )
            .filter(account::Column::Id.eq(account_id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    /// Remove an account on disconnection.
    pub async fn delete(&self, tenant_id: Uuid, account_id: Uuid) -> Result<bool, MarketError> {
        let result = Account::delete_many()
            .filter(account::Column::Id.eq(account_id))
            .filter(account::Column::TenantId.eq(tenant_id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }
}
