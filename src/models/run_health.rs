//! RunHealth entity model
//!
//! Aggregate success/failure bookkeeping per (account, job kind), upserted
//! after every run regardless of outcome. The consecutive_errors counter is
//! the circuit breaker input for automatic scheduling.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// RunHealth entity for one (account, job kind) pair
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "run_health")]
pub struct Model {
    /// Unique identifier for the row (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Tenant identifier for multi-tenancy
    pub tenant_id: Uuid,

    /// Account this health row belongs to
    pub account_id: Uuid,

    /// Job kind the counters apply to
    pub job_kind: String,

    /// Whether a run is currently leased for this pair
    pub is_running: bool,

    /// Timestamp of the most recent run
    pub last_run_at: Option<DateTimeWithTimeZone>,

    /// Cumulative successful item count across all runs
    pub total_success_count: i64,

    /// Per-item success count of the most recent run
    pub last_success_count: i32,

    /// Per-item failure count of the most recent run
    pub last_failure_count: i32,

    /// Per-item skip count of the most recent run
    pub last_skip_count: i32,

    /// Most recent run-level error message
    pub last_error: Option<String>,

    /// Consecutive failed runs; resets to 0 on any successful run
    pub consecutive_errors: i32,

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
