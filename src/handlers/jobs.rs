//! # Jobs API Handlers
//!
//! Triggering syncs and batch actions, and inspecting the job queue.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use uuid::Uuid;

use crate::auth::{OperatorAuth, TenantExtension, TenantHeader};
use crate::error::{ApiError, not_found};
use crate::handlers::types::{JobListQuery, JobResponse, TriggerActionRequest, TriggerSyncRequest};
use crate::models::sync_job::{JobPayload, kind};
use crate::server::AppState;

/// Enqueue a full sync for an account
#[utoipa::path(
    post,
    path = "/accounts/{account_id}/sync",
    params(
        ("account_id" = Uuid, Path, description = "Account to sync"),
        TenantHeader,
    ),
    request_body = TriggerSyncRequest,
    responses(
        (status = 202, description = "Sync job enqueued", body = JobResponse),
        (status = 404, description = "Account not found"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer_auth" = [])),
    tag = "jobs"
)]
pub async fn trigger_sync(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(account_id): Path<Uuid>,
    body: Option<Json<TriggerSyncRequest>>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    ensure_account(&state, tenant.0, account_id).await?;

    let payload = JobPayload {
        path: request.path,
        ..JobPayload::default()
    };
    let job = state
        .jobs
        .enqueue(
            tenant.0,
            account_id,
            kind::FULL_SYNC,
            payload.into_column(),
            Utc::now(),
            request.priority.unwrap_or(10),
        )
        .await?;

    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

/// Enqueue a batch action run for an account
#[utoipa::path(
    post,
    path = "/accounts/{account_id}/actions",
    params(
        ("account_id" = Uuid, Path, description = "Account to run actions for"),
        TenantHeader,
    ),
    request_body = TriggerActionRequest,
    responses(
        (status = 202, description = "Batch action job enqueued", body = JobResponse),
        (status = 404, description = "Account not found"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer_auth" = [])),
    tag = "jobs"
)]
pub async fn trigger_batch_action(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(account_id): Path<Uuid>,
    body: Option<Json<TriggerActionRequest>>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    ensure_account(&state, tenant.0, account_id).await?;

    let payload = JobPayload {
        action_kind: request.action_kind,
        ..JobPayload::default()
    };
    let job = state
        .jobs
        .enqueue(
            tenant.0,
            account_id,
            kind::BATCH_ACTION,
            payload.into_column(),
            Utc::now(),
            request.priority.unwrap_or(10),
        )
        .await?;

    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

/// List queue jobs for the tenant
#[utoipa::path(
    get,
    path = "/jobs",
    params(JobListQuery, TenantHeader),
    responses(
        (status = 200, description = "Jobs for the tenant", body = [JobResponse]),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer_auth" = [])),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Query(query): Query<JobListQuery>,
) -> Result<Json<Vec<JobResponse>>, ApiError> {
    let jobs = state
        .jobs
        .list_by_tenant(
            tenant.0,
            query.account_id,
            query.job_kind,
            query.status,
            query.limit,
            query.offset,
        )
        .await?;

    Ok(Json(jobs.into_iter().map(Into::into).collect()))
}

/// Fetch one queue job
#[utoipa::path(
    get,
    path = "/jobs/{job_id}",
    params(
        ("job_id" = Uuid, Path, description = "Job identifier"),
        TenantHeader,
    ),
    responses(
        (status = 200, description = "Job detail", body = JobResponse),
        (status = 404, description = "Job not found"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer_auth" = [])),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state
        .jobs
        .find_by_tenant(tenant.0, job_id)
        .await?
        .ok_or_else(|| not_found("Job not found"))?;

    Ok(Json(job.into()))
}

async fn ensure_account(
    state: &AppState,
    tenant_id: Uuid,
    account_id: Uuid,
) -> Result<(), ApiError> {
    state
        .accounts
        .get_by_tenant(tenant_id, account_id)
        .await?
        .map(|_| ())
        .ok_or_else(|| not_found("Account not found"))
}
