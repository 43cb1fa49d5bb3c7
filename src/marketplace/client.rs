//! Resilient marketplace API client.
//!
//! Composes the signed request executor with the credential service. On an
//! auth failure it refreshes the credential exactly once and retries the
//! call exactly once; a second auth failure surfaces as `ReauthRequired`
//! rather than looping. All other errors pass through unchanged so retry
//! policy stays at the job layer.

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::Method;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::credentials::CredentialService;
use crate::error::MarketError;
use crate::marketplace::signer::{CallOutcome, SignedRequestExecutor};

/// Marketplace API client with single-refresh retry semantics.
#[derive(Clone)]
pub struct ApiClient {
    signer: SignedRequestExecutor,
    credentials: Arc<CredentialService>,
}

impl ApiClient {
    pub fn new(signer: SignedRequestExecutor, credentials: Arc<CredentialService>) -> Self {
        Self {
            signer,
            credentials,
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialService> {
        &self.credentials
    }

    /// Execute a signed call for an account, refreshing once on auth expiry.
    pub async fn call(
        &self,
        account_id: Uuid,
        method: Method,
        path: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<JsonValue, MarketError> {
        let credential = self.credentials.get_valid(account_id).await?;

        match self
            .signer
            .execute(method.clone(), path, params, &credential)
            .await
        {
            CallOutcome::Success(body) => Ok(body),
            CallOutcome::Failed(error) => Err(error),
            CallOutcome::AuthExpired => {
                tracing::info!(
                    account_id = %account_id,
                    path,
                    "Access token rejected, refreshing once and retrying"
                );
                metrics::counter!("marketsync_auth_retries_total").increment(1);

                let model = self
                    .credentials
                    .repository()
                    .get_by_id(account_id)
                    .await?
                    .ok_or_else(|| {
                        MarketError::Validation(format!("unknown account {}", account_id))
                    })?;
                let refreshed = self.credentials.refresh(&model, &credential).await?;

                match self.signer.execute(method, path, params, &refreshed).await {
                    CallOutcome::Success(body) => Ok(body),
                    CallOutcome::Failed(error) => Err(error),
                    CallOutcome::AuthExpired => {
                        // The refreshed token was rejected too; the grant is
                        // effectively revoked.
                        let reason = "access token rejected after refresh".to_string();
                        self.credentials
                            .mark_reauth_required(account_id, &reason)
                            .await?;
                        Err(MarketError::ReauthRequired { reason })
                    }
                }
            }
        }
    }

    /// GET convenience wrapper.
    pub async fn get(
        &self,
        account_id: Uuid,
        path: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<JsonValue, MarketError> {
        self.call(account_id, Method::GET, path, params).await
    }

    /// POST convenience wrapper.
    pub async fn post(
        &self,
        account_id: Uuid,
        path: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<JsonValue, MarketError> {
        self.call(account_id, Method::POST, path, params).await
    }

    /// Fetch the total unit count a sync of `path` would cover, used by the
    /// chunk planner. The platform reports it as `total` in the envelope.
    pub async fn count_units(&self, account_id: Uuid, path: &str) -> Result<u64, MarketError> {
        let mut params = BTreeMap::new();
        params.insert("offset".to_string(), "0".to_string());
        params.insert("limit".to_string(), "1".to_string());

        let body = self.get(account_id, path, &params).await?;
        body.get("total")
            .and_then(JsonValue::as_u64)
            .ok_or_else(|| MarketError::Platform {
                code: None,
                message: format!("response from {} missing total count", path),
            })
    }

    /// Fetch one page of sync units.
    pub async fn fetch_page(
        &self,
        account_id: Uuid,
        path: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<JsonValue>, MarketError> {
        let mut params = BTreeMap::new();
        params.insert("offset".to_string(), offset.to_string());
        params.insert("limit".to_string(), limit.to_string());

        let body = self.get(account_id, path, &params).await?;
        let items = body
            .get("items")
            .and_then(JsonValue::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(items)
    }

    /// Submit a batch of actions as one call. Returns the per-item result
    /// list from the platform; callers must match results by id, never by
    /// position.
    pub async fn submit_batch(
        &self,
        account_id: Uuid,
        path: &str,
        items: &[JsonValue],
    ) -> Result<Vec<JsonValue>, MarketError> {
        let mut params = BTreeMap::new();
        params.insert(
            "items".to_string(),
            serde_json::to_string(items)
                .map_err(|e| MarketError::Validation(format!("unserializable batch: {}", e)))?,
        );

        let body = self.post(account_id, path, &params).await?;
        let results = body
            .get("results")
            .and_then(JsonValue::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(results)
    }
}
