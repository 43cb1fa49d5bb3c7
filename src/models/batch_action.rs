//! BatchActionRecord entity model
//!
//! Append-only audit rows, one per attempted idempotent action inside a
//! batch run. Rows are created pending before the batch call and updated
//! exactly once with the terminal status afterwards.

use chrono::NaiveDate;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// BatchActionRecord entity for one attempted action within a batch
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "batch_actions")]
pub struct Model {
    /// Unique identifier for the record (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Tenant identifier for multi-tenancy
    pub tenant_id: Uuid,

    /// Account the action was performed for
    pub account_id: Uuid,

    /// Kind of action (e.g., review_reply, campaign_upsert)
    pub action_kind: String,

    /// Marketplace-side identifier of the target item
    pub target_id: String,

    /// Payload submitted (or that would have been submitted) upstream
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: Option<JsonValue>,

    /// Status (pending | success | failed | skipped)
    pub status: String,

    /// Reason an item was skipped without being submitted
    pub skip_reason: Option<String>,

    /// Error detail for failed items
    pub error: Option<String>,

    /// Logical day of the action, part of the idempotency key
    pub action_date: NaiveDate,

    /// Timestamp when the record was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the record was last updated
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

/// Batch action status values
pub mod status {
    pub const PENDING: &str = "pending";
    pub const SUCCESS: &str = "success";
    pub const FAILED: &str = "failed";
    pub const SKIPPED: &str = "skipped";
}
