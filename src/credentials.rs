//! Credential store and on-demand refresher.
//!
//! Owns the access/refresh token lifecycle for marketplace accounts.
//! `get_valid` hands out a credential only when it has a safety margin of
//! validity left; otherwise it performs the refresh-token exchange and
//! persists the new pair with a compare-and-swap on the previously-read
//! refresh token, so parallel invocations refreshing the same account
//! cannot clobber each other.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::config::CredentialConfig;
use crate::error::MarketError;
use crate::models::account;
use crate::repositories::AccountRepository;
use crate::repositories::account::DecryptedCredential;

/// How a failed refresh-token exchange should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshErrorClassification {
    /// The grant is dead; the merchant must re-authorize.
    Permanent,
    /// Transient platform/network trouble; the job layer may retry.
    Transient,
    /// Throttled; retry later.
    RateLimited,
}

/// Classify a refresh failure from the platform's error string.
pub fn classify_refresh_error(error: &str) -> RefreshErrorClassification {
    let lowered = error.to_lowercase();

    const PERMANENT_MARKERS: &[&str] = &[
        "invalid_grant",
        "invalid_refresh_token",
        "expired_refresh_token",
        "unauthorized_client",
        "access_denied",
        "revoked",
    ];
    const RATE_MARKERS: &[&str] = &["rate limit", "rate_limit", "too many requests", "429"];

    if PERMANENT_MARKERS.iter().any(|m| lowered.contains(m)) {
        RefreshErrorClassification::Permanent
    } else if RATE_MARKERS.iter().any(|m| lowered.contains(m)) {
        RefreshErrorClassification::RateLimited
    } else {
        RefreshErrorClassification::Transient
    }
}

/// Whether a credential still has at least `margin` of validity left.
pub fn is_fresh(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>, margin: Duration) -> bool {
    match expires_at {
        Some(expiry) => expiry - margin > now,
        // No recorded expiry means the platform never expires the token.
        None => true,
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Credential store and refresher for marketplace accounts.
#[derive(Clone)]
pub struct CredentialService {
    accounts: AccountRepository,
    http: reqwest::Client,
    token_endpoint: String,
    partner_id: Option<String>,
    expiry_margin: Duration,
}

impl CredentialService {
    pub fn new(
        accounts: AccountRepository,
        http: reqwest::Client,
        api_base: &str,
        partner_id: Option<String>,
        config: &CredentialConfig,
    ) -> Self {
        Self {
            accounts,
            http,
            token_endpoint: format!("{}/auth/token/refresh", api_base.trim_end_matches('/')),
            partner_id,
            expiry_margin: Duration::seconds(config.expiry_margin_seconds as i64),
        }
    }

    /// Return a credential with at least the safety margin of validity,
    /// refreshing first if needed.
    pub async fn get_valid(&self, account_id: Uuid) -> Result<DecryptedCredential, MarketError> {
        let model = self.load_account(account_id).await?;

        if model.status == account::status::REAUTH_REQUIRED {
            return Err(MarketError::ReauthRequired {
                reason: "account previously failed refresh".to_string(),
            });
        }

        let credential = self.accounts.decrypt(&model)?;

        if credential.access_token.is_some()
            && is_fresh(credential.expires_at, Utc::now(), self.expiry_margin)
        {
            return Ok(credential);
        }

        self.refresh(&model, &credential).await
    }

    /// Perform the refresh-token exchange and persist the new pair.
    ///
    /// Commit uses optimistic concurrency: if another invocation refreshed
    /// the account since `witness` was read, the exchange result is
    /// discarded and the winner's credential is returned instead.
    pub async fn refresh(
        &self,
        model: &account::Model,
        witness: &DecryptedCredential,
    ) -> Result<DecryptedCredential, MarketError> {
        let refresh_token = witness.refresh_token.as_deref().ok_or_else(|| {
            MarketError::ReauthRequired {
                reason: "no refresh token on record".to_string(),
            }
        })?;

        tracing::info!(
            account_id = %model.id,
            tenant_id = %model.tenant_id,
            "Refreshing marketplace credential"
        );
        metrics::counter!("marketsync_credential_refreshes_total").increment(1);

        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
            ("shop_id", witness.external_id.clone()),
        ];
        if let Some(partner) = &self.partner_id {
            form.push(("partner_id", partner.clone()));
        }

        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let parsed: RefreshResponse = response.json().await?;

        if let Some(error) = parsed.error.as_deref() {
            return Err(self
                .handle_refresh_error(model, error, parsed.error_description.as_deref())
                .await);
        }

        if !status.is_success() {
            return Err(MarketError::Platform {
                code: Some(status.as_u16().to_string()),
                message: format!("refresh endpoint returned HTTP {}", status),
            });
        }

        let new_access = parsed.access_token.ok_or_else(|| MarketError::Platform {
            code: None,
            message: "refresh response missing access_token".to_string(),
        })?;
        let expires_at = Utc::now() + Duration::seconds(parsed.expires_in.unwrap_or(3600));

        let committed = self
            .accounts
            .commit_refreshed_tokens(
                model,
                witness.refresh_token_ciphertext.as_deref(),
                &new_access,
                parsed.refresh_token.as_deref(),
                expires_at,
            )
            .await?;

        if !committed {
            // A concurrent refresher won the race; use its result.
            tracing::debug!(
                account_id = %model.id,
                "Concurrent refresh detected, reloading stored credential"
            );
            let reloaded = self.load_account(model.id).await?;
            return self.accounts.decrypt(&reloaded);
        }

        let reloaded = self.load_account(model.id).await?;
        self.accounts.decrypt(&reloaded)
    }

    /// Mark an account as requiring re-authorization. Terminal until the
    /// merchant reconnects.
    pub async fn mark_reauth_required(
        &self,
        account_id: Uuid,
        reason: &str,
    ) -> Result<(), MarketError> {
        tracing::warn!(account_id = %account_id, reason, "Account requires re-authorization");
        metrics::counter!("marketsync_reauth_required_total").increment(1);
        self.accounts
            .set_status(account_id, account::status::REAUTH_REQUIRED)
            .await
    }

    /// Accounts whose tokens expire within `lead`, for the background
    /// refresher.
    pub async fn accounts_needing_refresh(
        &self,
        lead: Duration,
        limit: u64,
    ) -> Result<Vec<account::Model>, MarketError> {
        self.accounts
            .list_expiring_before(Utc::now() + lead, limit)
            .await
    }

    pub fn repository(&self) -> &AccountRepository {
        &self.accounts
    }

    async fn load_account(&self, account_id: Uuid) -> Result<account::Model, MarketError> {
        self.accounts
            .get_by_id(account_id)
            .await?
            .ok_or_else(|| MarketError::Validation(format!("unknown account {}", account_id)))
    }

    async fn handle_refresh_error(
        &self,
        model: &account::Model,
        error: &str,
        description: Option<&str>,
    ) -> MarketError {
        let detail = match description {
            Some(description) => format!("{}: {}", error, description),
            None => error.to_string(),
        };

        match classify_refresh_error(&detail) {
            RefreshErrorClassification::Permanent => {
                if let Err(db_err) = self.mark_reauth_required(model.id, &detail).await {
                    tracing::error!(
                        account_id = %model.id,
                        error = %db_err,
                        "Failed to persist reauth_required status"
                    );
                }
                MarketError::ReauthRequired { reason: detail }
            }
            RefreshErrorClassification::RateLimited => MarketError::RateLimited {
                retry_after_seconds: None,
            },
            RefreshErrorClassification::Transient => MarketError::Platform {
                code: None,
                message: detail,
            },
        }
    }
}
