//! # Progress API Handlers
//!
//! Visibility into chunked sync runs, plus the manual reset that is the
//! only permitted backwards stage transition.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;

use crate::auth::{OperatorAuth, TenantExtension, TenantHeader};
use crate::error::{ApiError, not_found};
use crate::handlers::types::ProgressResponse;
use crate::server::AppState;

/// List sync runs for the tenant
#[utoipa::path(
    get,
    path = "/progress",
    params(TenantHeader),
    responses(
        (status = 200, description = "Sync runs for the tenant", body = [ProgressResponse]),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer_auth" = [])),
    tag = "progress"
)]
pub async fn list_progress(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
) -> Result<Json<Vec<ProgressResponse>>, ApiError> {
    let runs = state.progress.list_by_tenant(tenant.0).await?;
    Ok(Json(runs.into_iter().map(Into::into).collect()))
}

/// Fetch the sync run for one (account, kind) pair
#[utoipa::path(
    get,
    path = "/accounts/{account_id}/progress/{sync_kind}",
    params(
        ("account_id" = Uuid, Path, description = "Account identifier"),
        ("sync_kind" = String, Path, description = "Sync kind (dataset path)"),
        TenantHeader,
    ),
    responses(
        (status = 200, description = "Sync run detail", body = ProgressResponse),
        (status = 404, description = "No run recorded"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer_auth" = [])),
    tag = "progress"
)]
pub async fn get_progress(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path((account_id, sync_kind)): Path<(Uuid, String)>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let run = find_run(&state, tenant.0, account_id, &sync_kind).await?;
    Ok(Json(run.into()))
}

/// Reset a sync run back to idle
#[utoipa::path(
    post,
    path = "/accounts/{account_id}/progress/{sync_kind}/reset",
    params(
        ("account_id" = Uuid, Path, description = "Account identifier"),
        ("sync_kind" = String, Path, description = "Sync kind (dataset path)"),
        TenantHeader,
    ),
    responses(
        (status = 204, description = "Run reset to idle"),
        (status = 404, description = "No run recorded"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer_auth" = [])),
    tag = "progress"
)]
pub async fn reset_progress(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path((account_id, sync_kind)): Path<(Uuid, String)>,
) -> Result<StatusCode, ApiError> {
    let run = find_run(&state, tenant.0, account_id, &sync_kind).await?;
    state.progress.reset(run.id).await?;

    tracing::info!(
        account_id = %account_id,
        sync_kind = %sync_kind,
        run_id = %run.id,
        "Sync run manually reset"
    );

    Ok(StatusCode::NO_CONTENT)
}

async fn find_run(
    state: &AppState,
    tenant_id: Uuid,
    account_id: Uuid,
    sync_kind: &str,
) -> Result<crate::models::sync_progress::Model, ApiError> {
    let run = state
        .progress
        .get_by_account_kind(account_id, sync_kind)
        .await?
        .filter(|run| run.tenant_id == tenant_id)
        .ok_or_else(|| not_found("No sync run recorded for this account and kind"))?;
    Ok(run)
}
