//! # Common API Types
//!
//! Request and response bodies shared across the operator API handlers.
//! Responses never expose token ciphertexts or other credential material.

use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::sync_progress::failed_chunks_from_column;
use crate::models::{account, batch_action, run_health, sync_job, sync_progress};

fn to_utc(ts: DateTimeWithTimeZone) -> DateTime<Utc> {
    ts.with_timezone(&Utc)
}

/// Request body for connecting a marketplace account
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateAccountRequest {
    /// Marketplace-side identifier (shop id)
    pub external_id: String,
    /// Human-readable label
    #[serde(default)]
    pub display_name: Option<String>,
    /// Initial access token issued by the platform
    #[serde(default)]
    pub access_token: Option<String>,
    /// Refresh token issued alongside the access token
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds, from the token grant
    #[serde(default)]
    pub expires_in_seconds: Option<i64>,
    /// Per-account signing secret reference, when the platform issues one
    #[serde(default)]
    pub signing_key_ref: Option<String>,
}

/// Account representation returned by the API
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AccountResponse {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub external_id: String,
    pub display_name: Option<String>,
    /// active | reauth_required | disconnected
    pub status: String,
    /// Access token expiry, if the platform expires tokens
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<account::Model> for AccountResponse {
    fn from(model: account::Model) -> Self {
        Self {
            id: model.id,
            tenant_id: model.tenant_id,
            external_id: model.external_id,
            display_name: model.display_name,
            status: model.status,
            expires_at: model.expires_at.map(to_utc),
            created_at: to_utc(model.created_at),
            updated_at: to_utc(model.updated_at),
        }
    }
}

/// Request body for triggering a full sync
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct TriggerSyncRequest {
    /// Upstream dataset path to sync (defaults to the catalog)
    #[serde(default)]
    pub path: Option<String>,
    /// Claim priority; higher claims first
    #[serde(default)]
    pub priority: Option<i16>,
}

/// Request body for triggering a batch action run
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct TriggerActionRequest {
    /// Action kind (defaults to review_reply)
    #[serde(default)]
    pub action_kind: Option<String>,
    /// Claim priority; higher claims first
    #[serde(default)]
    pub priority: Option<i16>,
}

/// Queue job representation returned by the API
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobResponse {
    pub id: Uuid,
    pub account_id: Uuid,
    /// full_sync | chunk | batch_action
    pub job_kind: String,
    /// pending | leased | completed | failed
    pub status: String,
    pub priority: i16,
    pub attempts: i32,
    pub scheduled_at: DateTime<Utc>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub retry_after: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
}

impl From<sync_job::Model> for JobResponse {
    fn from(model: sync_job::Model) -> Self {
        Self {
            id: model.id,
            account_id: model.account_id,
            job_kind: model.job_kind,
            status: model.status,
            priority: model.priority,
            attempts: model.attempts,
            scheduled_at: to_utc(model.scheduled_at),
            lease_expires_at: model.lease_expires_at.map(to_utc),
            retry_after: model.retry_after.map(to_utc),
            started_at: model.started_at.map(to_utc),
            finished_at: model.finished_at.map(to_utc),
            error: model.error,
            created_at: to_utc(model.created_at),
        }
    }
}

/// Query parameters for listing jobs
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct JobListQuery {
    pub account_id: Option<Uuid>,
    pub job_kind: Option<String>,
    pub status: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Sync run progress representation returned by the API
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProgressResponse {
    pub id: Uuid,
    pub account_id: Uuid,
    pub sync_kind: String,
    /// idle | planning | fetching_phase_one | fetching_phase_two |
    /// reconciling | completed | failed
    pub stage: String,
    pub total_units: i64,
    pub units_completed: i64,
    pub chunk_size: i64,
    pub total_chunks: i32,
    pub chunks_reported: i32,
    /// Indices of chunks that permanently failed this run
    pub failed_chunks: Vec<u32>,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<sync_progress::Model> for ProgressResponse {
    fn from(model: sync_progress::Model) -> Self {
        let failed_chunks = failed_chunks_from_column(model.failed_chunks.as_ref());
        Self {
            id: model.id,
            account_id: model.account_id,
            sync_kind: model.sync_kind,
            stage: model.stage,
            total_units: model.total_units,
            units_completed: model.units_completed,
            chunk_size: model.chunk_size,
            total_chunks: model.total_chunks,
            chunks_reported: model.chunks_reported,
            failed_chunks,
            last_error: model.last_error,
            started_at: model.started_at.map(to_utc),
            finished_at: model.finished_at.map(to_utc),
        }
    }
}

/// Run health and circuit breaker state for an (account, kind) pair
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RunHealthResponse {
    pub account_id: Uuid,
    pub job_kind: String,
    pub is_running: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub total_success_count: i64,
    pub last_success_count: i32,
    pub last_failure_count: i32,
    pub last_skip_count: i32,
    pub last_error: Option<String>,
    pub consecutive_errors: i32,
}

impl From<run_health::Model> for RunHealthResponse {
    fn from(model: run_health::Model) -> Self {
        Self {
            account_id: model.account_id,
            job_kind: model.job_kind,
            is_running: model.is_running,
            last_run_at: model.last_run_at.map(to_utc),
            total_success_count: model.total_success_count,
            last_success_count: model.last_success_count,
            last_failure_count: model.last_failure_count,
            last_skip_count: model.last_skip_count,
            last_error: model.last_error,
            consecutive_errors: model.consecutive_errors,
        }
    }
}

/// Batch action audit record returned by the API
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ActionRecordResponse {
    pub id: Uuid,
    pub account_id: Uuid,
    pub action_kind: String,
    pub target_id: String,
    /// pending | success | failed | skipped
    pub status: String,
    pub skip_reason: Option<String>,
    pub error: Option<String>,
    pub action_date: chrono::NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl From<batch_action::Model> for ActionRecordResponse {
    fn from(model: batch_action::Model) -> Self {
        Self {
            id: model.id,
            account_id: model.account_id,
            action_kind: model.action_kind,
            target_id: model.target_id,
            status: model.status,
            skip_reason: model.skip_reason,
            error: model.error,
            action_date: model.action_date,
            created_at: to_utc(model.created_at),
        }
    }
}

/// Query parameters for listing action records
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct ActionRecordsQuery {
    pub action_kind: Option<String>,
    pub limit: Option<u64>,
}

/// Service health probe response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// ok | degraded
    pub status: String,
    /// Database reachability
    pub database: bool,
}
