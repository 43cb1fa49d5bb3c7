//! Signed request construction and single-shot execution.
//!
//! Every call to the marketplace platform carries an HMAC-SHA256 signature
//! over a canonical parameter string. The executor performs exactly one
//! HTTP call per invocation and classifies the result; retry policy lives
//! one layer up in the resilient client.

use std::collections::BTreeMap;

use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Method, StatusCode};
use serde_json::Value as JsonValue;
use sha2::Sha256;

use crate::error::MarketError;
use crate::repositories::account::DecryptedCredential;

type HmacSha256 = Hmac<Sha256>;

/// Platform error codes that mean the access token is no longer accepted.
const AUTH_EXPIRED_CODES: &[&str] = &[
    "IllegalAccessToken",
    "SessionExpired",
    "InvalidSession",
    "27", // legacy numeric code for expired sessions
];

/// Result of one signed call.
#[derive(Debug)]
pub enum CallOutcome {
    /// 2xx with a well-formed body and no platform error envelope.
    Success(JsonValue),
    /// The platform rejected the access token; refresh may recover.
    AuthExpired,
    /// Anything else: transport failure, throttling, platform error.
    Failed(MarketError),
}

/// Executes signed marketplace requests, one HTTP call per invocation.
#[derive(Debug, Clone)]
pub struct SignedRequestExecutor {
    http: reqwest::Client,
    base_url: String,
    partner_id: Option<String>,
    signing_secret: Option<String>,
}

impl SignedRequestExecutor {
    pub fn new(
        http: reqwest::Client,
        base_url: String,
        partner_id: Option<String>,
        signing_secret: Option<String>,
    ) -> Self {
        Self {
            http,
            base_url,
            partner_id,
            signing_secret,
        }
    }

    /// Perform exactly one signed call. No retries, no persistence.
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        params: &BTreeMap<String, String>,
        credential: &DecryptedCredential,
    ) -> CallOutcome {
        let secret = match self.resolve_secret(credential) {
            Some(secret) => secret,
            None => {
                return CallOutcome::Failed(MarketError::Validation(
                    "no signing secret configured for account".to_string(),
                ));
            }
        };

        // Timestamps are taken at call time and never reused across calls,
        // so clock skew cannot invalidate a cached signature.
        let timestamp = Utc::now().timestamp();
        let signed = build_signed_params(
            path,
            params,
            credential,
            self.partner_id.as_deref(),
            timestamp,
            &secret,
        );

        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let request = match method {
            Method::GET => self.http.get(&url).query(&signed),
            _ => self.http.request(method, &url).form(&signed),
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => return CallOutcome::Failed(MarketError::Transport(err)),
        };

        classify_response(response).await
    }

    fn resolve_secret(&self, credential: &DecryptedCredential) -> Option<String> {
        // Per-account signing material wins over the shared secret.
        credential
            .signing_key_ref
            .clone()
            .or_else(|| self.signing_secret.clone())
    }
}

/// Assemble the full parameter map including system parameters and the
/// signature itself.
pub fn build_signed_params(
    path: &str,
    params: &BTreeMap<String, String>,
    credential: &DecryptedCredential,
    partner_id: Option<&str>,
    timestamp: i64,
    secret: &str,
) -> BTreeMap<String, String> {
    let mut all: BTreeMap<String, String> = params.clone();
    all.insert("shop_id".to_string(), credential.external_id.clone());
    all.insert("timestamp".to_string(), timestamp.to_string());
    all.insert("tenant_id".to_string(), credential.tenant_id.to_string());
    if let Some(partner) = partner_id {
        all.insert("partner_id".to_string(), partner.to_string());
    }
    if let Some(token) = credential.access_token.as_deref() {
        all.insert("access_token".to_string(), token.to_string());
    }
    all.insert("sign_method".to_string(), "hmac-sha256".to_string());

    let canonical = canonical_string(path, &all);
    let signature = sign(secret, &canonical);
    all.insert("sign".to_string(), signature);
    all
}

/// Deterministic canonical form: the path followed by every parameter in
/// lexicographic key order, concatenated as `key` + `value`.
pub fn canonical_string(path: &str, params: &BTreeMap<String, String>) -> String {
    let mut canonical = String::from(path);
    for (key, value) in params {
        canonical.push_str(key);
        canonical.push_str(value);
    }
    canonical
}

/// HMAC-SHA256 over the canonical string, hex-encoded uppercase.
pub fn sign(secret: &str, canonical: &str) -> String {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC key length is unrestricted"));
    mac.update(canonical.as_bytes());
    hex::encode_upper(mac.finalize().into_bytes())
}

async fn classify_response(response: reqwest::Response) -> CallOutcome {
    let status = response.status();

    if status == StatusCode::UNAUTHORIZED {
        return CallOutcome::AuthExpired;
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_seconds = response
            .headers()
            .get("retry-after")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        return CallOutcome::Failed(MarketError::RateLimited {
            retry_after_seconds,
        });
    }

    let body: JsonValue = match response.json().await {
        Ok(body) => body,
        Err(err) => return CallOutcome::Failed(MarketError::Transport(err)),
    };

    // The platform reports business errors inside a 200 envelope.
    if let Some(error) = body.get("error_response") {
        let code = error
            .get("code")
            .map(|c| match c {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default();
        let message = error
            .get("msg")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown platform error")
            .to_string();

        if AUTH_EXPIRED_CODES.contains(&code.as_str()) {
            return CallOutcome::AuthExpired;
        }

        return CallOutcome::Failed(MarketError::Platform {
            code: Some(code),
            message,
        });
    }

    if !status.is_success() {
        return CallOutcome::Failed(MarketError::Platform {
            code: Some(status.as_u16().to_string()),
            message: format!("marketplace returned HTTP {}", status),
        });
    }

    CallOutcome::Success(body)
}
