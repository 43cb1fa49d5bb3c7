//! # Accounts API Handlers
//!
//! Connecting, inspecting, and disconnecting marketplace accounts. Token
//! material is encrypted at rest and never leaves the service.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{OperatorAuth, TenantExtension, TenantHeader};
use crate::error::{ApiError, not_found, validation_error};
use crate::handlers::types::{AccountResponse, CreateAccountRequest};
use crate::server::AppState;

/// Query parameters for listing accounts
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct ListAccountsQuery {
    /// Filter by status (active | reauth_required | disconnected)
    pub status: Option<String>,
}

/// List accounts for the tenant
#[utoipa::path(
    get,
    path = "/accounts",
    params(ListAccountsQuery, TenantHeader),
    responses(
        (status = 200, description = "Accounts for the tenant", body = [AccountResponse]),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer_auth" = [])),
    tag = "accounts"
)]
pub async fn list_accounts(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Query(query): Query<ListAccountsQuery>,
) -> Result<Json<Vec<AccountResponse>>, ApiError> {
    let accounts = state
        .accounts
        .list_by_tenant(tenant.0, query.status.as_deref())
        .await?;

    Ok(Json(accounts.into_iter().map(Into::into).collect()))
}

/// Connect a marketplace account
#[utoipa::path(
    post,
    path = "/accounts",
    params(TenantHeader),
    request_body = CreateAccountRequest,
    responses(
        (status = 201, description = "Account connected", body = AccountResponse),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer_auth" = [])),
    tag = "accounts"
)]
pub async fn create_account(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Json(request): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<AccountResponse>), ApiError> {
    if request.external_id.trim().is_empty() {
        return Err(validation_error(
            "Invalid account",
            serde_json::json!({ "external_id": "Must not be empty" }),
        ));
    }

    let expires_at = request
        .expires_in_seconds
        .map(|seconds| Utc::now() + Duration::seconds(seconds));

    let account = state
        .accounts
        .create_with_tokens(
            tenant.0,
            request.external_id.trim(),
            request.display_name,
            request.access_token.as_deref(),
            request.refresh_token.as_deref(),
            expires_at,
            request.signing_key_ref,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(account.into())))
}

/// Fetch one account
#[utoipa::path(
    get,
    path = "/accounts/{account_id}",
    params(
        ("account_id" = Uuid, Path, description = "Account identifier"),
        TenantHeader,
    ),
    responses(
        (status = 200, description = "Account detail", body = AccountResponse),
        (status = 404, description = "Account not found"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer_auth" = [])),
    tag = "accounts"
)]
pub async fn get_account(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(account_id): Path<Uuid>,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state
        .accounts
        .get_by_tenant(tenant.0, account_id)
        .await?
        .ok_or_else(|| not_found("Account not found"))?;

    Ok(Json(account.into()))
}

/// Disconnect an account
#[utoipa::path(
    delete,
    path = "/accounts/{account_id}",
    params(
        ("account_id" = Uuid, Path, description = "Account identifier"),
        TenantHeader,
    ),
    responses(
        (status = 204, description = "Account disconnected"),
        (status = 404, description = "Account not found"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer_auth" = [])),
    tag = "accounts"
)]
pub async fn delete_account(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(account_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let deleted = state.accounts.delete(tenant.0, account_id).await?;
    if !deleted {
        return Err(not_found("Account not found"));
    }

    Ok(StatusCode::NO_CONTENT)
}
