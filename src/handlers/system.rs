//! # System Handlers
//!
//! Health probe, run health visibility, and the manual circuit breaker
//! reset.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;

use crate::auth::{OperatorAuth, TenantExtension, TenantHeader};
use crate::db;
use crate::error::{ApiError, not_found};
use crate::handlers::types::{HealthResponse, RunHealthResponse};
use crate::server::AppState;

/// Liveness and database reachability probe
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse),
        (status = 503, description = "Database unreachable", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match db::health_check(&state.db).await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
                database: true,
            }),
        ),
        Err(error) => {
            tracing::error!(error = %error, "Database health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded".to_string(),
                    database: false,
                }),
            )
        }
    }
}

/// List run health rows for the tenant
#[utoipa::path(
    get,
    path = "/run-health",
    params(TenantHeader),
    responses(
        (status = 200, description = "Run health per (account, kind)", body = [RunHealthResponse]),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer_auth" = [])),
    tag = "system"
)]
pub async fn list_run_health(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
) -> Result<Json<Vec<RunHealthResponse>>, ApiError> {
    let rows = state.run_health.list_by_tenant(tenant.0).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// Reset the circuit breaker for an (account, kind) pair
#[utoipa::path(
    post,
    path = "/accounts/{account_id}/run-health/{job_kind}/reset",
    params(
        ("account_id" = Uuid, Path, description = "Account identifier"),
        ("job_kind" = String, Path, description = "Job kind (e.g. batch_action)"),
        TenantHeader,
    ),
    responses(
        (status = 204, description = "Circuit breaker reset"),
        (status = 404, description = "No health row for this pair"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer_auth" = [])),
    tag = "system"
)]
pub async fn reset_circuit_breaker(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path((account_id, job_kind)): Path<(Uuid, String)>,
) -> Result<StatusCode, ApiError> {
    // Scope the reset to the tenant before touching the row.
    let owned = state
        .run_health
        .get(account_id, &job_kind)
        .await?
        .filter(|row| row.tenant_id == tenant.0)
        .is_some();
    if !owned {
        return Err(not_found("No run health recorded for this account and kind"));
    }

    let reset = state.run_health.reset_errors(account_id, &job_kind).await?;
    if !reset {
        return Err(not_found("No run health recorded for this account and kind"));
    }

    tracing::info!(
        account_id = %account_id,
        job_kind = %job_kind,
        "Circuit breaker manually reset"
    );

    Ok(StatusCode::NO_CONTENT)
}
