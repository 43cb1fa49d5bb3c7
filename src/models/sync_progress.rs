//! SyncProgress entity model
//!
//! One row per (account, sync kind) run. The chunk planner initializes it
//! at planning time; chunk invocations report into it until every planned
//! chunk has a completion record.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// SyncProgress entity tracking one chunked (or inline) sync run
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_progress")]
pub struct Model {
    /// Unique identifier for the run (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Tenant identifier for multi-tenancy
    pub tenant_id: Uuid,

    /// Account this run belongs to
    pub account_id: Uuid,

    /// Kind of sync being tracked (e.g., campaigns, reviews)
    pub sync_kind: String,

    /// Total units of work captured at planning time
    pub total_units: i64,

    /// Units completed so far; monotonically non-decreasing
    pub units_completed: i64,

    /// Chunk size the run was planned with
    pub chunk_size: i64,

    /// Number of chunks planned for this run
    pub total_chunks: i32,

    /// Number of chunks that have reported (success or failure)
    pub chunks_reported: i32,

    /// Stage of the run state machine; forward-only except manual reset
    pub stage: String,

    /// Indices of chunks that reported failure
    #[sea_orm(column_type = "JsonBinary")]
    pub failed_chunks: Option<JsonValue>,

    /// Most recent chunk-level error message
    pub last_error: Option<String>,

    /// Timestamp when the run was planned
    pub started_at: Option<DateTimeWithTimeZone>,

    /// Timestamp when the run reached a terminal stage
    pub finished_at: Option<DateTimeWithTimeZone>,

    /// Timestamp when the row was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the row was last updated
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

/// Run stage values
pub mod stage {
    pub const IDLE: &str = "idle";
    pub const PLANNING: &str = "planning";
    pub const FETCHING_PHASE_ONE: &str = "fetching_phase_one";
    pub const FETCHING_PHASE_TWO: &str = "fetching_phase_two";
    pub const RECONCILING: &str = "reconciling";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
}

/// Decode the failed_chunks column into chunk indices.
pub fn failed_chunks_from_column(value: Option<&JsonValue>) -> Vec<u32> {
    value
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}
