//! # Batch Action Audit Handlers
//!
//! Read access to the append-only batch action records.

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use uuid::Uuid;

use crate::auth::{OperatorAuth, TenantExtension, TenantHeader};
use crate::error::ApiError;
use crate::handlers::types::{ActionRecordResponse, ActionRecordsQuery};
use crate::server::AppState;

/// List batch action records for an account, newest first
#[utoipa::path(
    get,
    path = "/accounts/{account_id}/actions/records",
    params(
        ("account_id" = Uuid, Path, description = "Account identifier"),
        ActionRecordsQuery,
        TenantHeader,
    ),
    responses(
        (status = 200, description = "Action records", body = [ActionRecordResponse]),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer_auth" = [])),
    tag = "actions"
)]
pub async fn list_action_records(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(account_id): Path<Uuid>,
    Query(query): Query<ActionRecordsQuery>,
) -> Result<Json<Vec<ActionRecordResponse>>, ApiError> {
    let records = state
        .batch_records
        .list_by_account(
            tenant.0,
            account_id,
            query.action_kind.as_deref(),
            query.limit.unwrap_or(100).min(500),
        )
        .await?;

    Ok(Json(records.into_iter().map(Into::into).collect()))
}
