//! SyncJob entity model
//!
//! This module contains the SeaORM entity model for the sync_jobs table,
//! the durable work queue the lease manager operates on. Jobs move
//! pending -> leased -> {completed | failed}; the sweeper may force
//! leased -> pending when a lease expires without a terminal transition.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// SyncJob entity representing one unit of deferred work
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_jobs")]
pub struct Model {
    /// Unique identifier for the sync job (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Tenant identifier for multi-tenancy
    pub tenant_id: Uuid,

    /// Account this job operates on
    pub account_id: Uuid,

    /// Kind of job (full_sync | chunk | batch_action)
    pub job_kind: String,

    /// Current status (pending | leased | completed | failed)
    pub status: String,

    /// Job priority for claiming (higher values claim first)
    pub priority: i16,

    /// Number of attempts made for this job
    pub attempts: i32,

    /// Timestamp when the job becomes eligible to run
    pub scheduled_at: DateTimeWithTimeZone,

    /// Lease expiry; set while leased, cleared on terminal transition
    pub lease_expires_at: Option<DateTimeWithTimeZone>,

    /// Timestamp when the job becomes eligible for retry after backoff
    pub retry_after: Option<DateTimeWithTimeZone>,

    /// Timestamp when the job last started execution
    pub started_at: Option<DateTimeWithTimeZone>,

    /// Timestamp when the job reached a terminal state
    pub finished_at: Option<DateTimeWithTimeZone>,

    /// Opaque work payload (offset/limit/chunk_index/...)
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: Option<JsonValue>,

    /// Structured error details if the job failed
    #[sea_orm(column_type = "JsonBinary")]
    pub error: Option<JsonValue>,

    /// Timestamp when the sync job was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the sync job was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::account::Entity",
        from = "Column::AccountId",
        to = "super::account::Column::Id"
    )]
    Account,
}

impl Related<super::account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Job status values
pub mod status {
    pub const PENDING: &str = "pending";
    pub const LEASED: &str = "leased";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
}

/// Job kind values
pub mod kind {
    pub const FULL_SYNC: &str = "full_sync";
    pub const CHUNK: &str = "chunk";
    pub const BATCH_ACTION: &str = "batch_action";
}

/// Typed view of the opaque job payload column.
///
/// Chunk jobs carry `{offset, limit, chunk_index, run_id, path}`; batch
/// action jobs carry `{action_kind}`; full syncs carry `{path}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Logical upstream path the sync reads from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Pagination offset for chunk jobs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    /// Pagination limit for chunk jobs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Zero-based chunk index within the planned run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
    /// SyncProgress row this chunk reports into
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    /// Action kind for batch_action jobs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_kind: Option<String>,
}

impl JobPayload {
    /// Parse the payload column, treating NULL as an empty payload.
    pub fn from_column(value: Option<&JsonValue>) -> Self {
        value
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    /// Serialize back into the payload column representation.
    pub fn into_column(self) -> Option<JsonValue> {
        serde_json::to_value(self).ok()
    }
}
