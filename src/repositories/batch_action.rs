//! # BatchActionRecord Repository
//!
//! Append-only audit records for batch actions. A record is created as
//! pending before the batch call and finalized exactly once afterwards;
//! only failed records may be re-opened, when a later run retries the
//! same target on the same logical day.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::MarketError;
use crate::models::batch_action::{self, Column, Entity, Model, status};

/// Repository for batch action audit records
#[derive(Debug, Clone)]
pub struct BatchActionRepository {
    db: Arc<DatabaseConnection>,
}

impl BatchActionRepository {
    /// Create a new BatchActionRepository with the given database connection
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Insert pending records for every target about to be submitted,
    /// in one transaction. A failed record for the same (account, kind,
    /// target, day) is flipped back to pending for the retry rather than
    /// inserted again, so the idempotency index never fires on a retried
    /// run. Returns the models keyed by submission order.
    pub async fn create_pending(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        action_kind: &str,
        action_date: NaiveDate,
        targets: &[(String, Option<JsonValue>)],
    ) -> Result<Vec<Model>, MarketError> {
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let now_tz = DateTimeWithTimeZone::from(Utc::now());

        let txn = self.db.begin().await?;

        let target_ids: Vec<String> = targets.iter().map(|(id, _)| id.clone()).collect();
        let mut existing: std::collections::HashMap<String, Model> = Entity::find()
            .filter(Column::AccountId.eq(account_id))
            .filter(Column::ActionKind.eq(action_kind))
            .filter(Column::ActionDate.eq(action_date))
            .filter(Column::TargetId.is_in(target_ids))
            .all(&txn)
            .await?
            .into_iter()
            .map(|m| (m.target_id.clone(), m))
            .collect();

        let mut ids = Vec::with_capacity(targets.len());
        let mut rows = Vec::with_capacity(targets.len());

        for (target_id, payload) in targets {
            match existing.remove(target_id) {
                Some(found) if found.status == status::FAILED => {
                    ids.push(found.id);
                    let mut active: batch_action::ActiveModel = found.into();
                    active.payload = Set(payload.clone());
                    active.status = Set(status::PENDING.to_string());
                    active.skip_reason = Set(None);
                    active.error = Set(None);
                    active.updated_at = Set(now_tz);
                    active.update(&txn).await?;
                }
                // A non-failed row already covers this target; callers
                // filter those out via recorded_targets beforehand.
                Some(_) => continue,
                None => {
                    let id = Uuid::new_v4();
                    ids.push(id);
                    rows.push(batch_action::ActiveModel {
                        id: Set(id),
                        tenant_id: Set(tenant_id),
                        account_id: Set(account_id),
                        action_kind: Set(action_kind.to_string()),
                        target_id: Set(target_id.clone()),
                        payload: Set(payload.clone()),
                        status: Set(status::PENDING.to_string()),
                        skip_reason: Set(None),
                        error: Set(None),
                        action_date: Set(action_date),
                        created_at: Set(now_tz),
                        updated_at: Set(now_tz),
                    });
                }
            }
        }

        if !rows.is_empty() {
            Entity::insert_many(rows).exec(&txn).await?;
        }
        let created = Entity::find()
            .filter(Column::Id.is_in(ids.clone()))
            .all(&txn)
            .await?;
        txn.commit().await?;

        // Preserve submission order for id matching downstream.
        let mut by_id: std::collections::HashMap<Uuid, Model> =
            created.into_iter().map(|m| (m.id, m)).collect();
        Ok(ids.into_iter().filter_map(|id| by_id.remove(&id)).collect())
    }

    /// Finalize a record as success.
    pub async fn mark_success(&self, record_id: Uuid) -> Result<(), MarketError> {
        self.finalize(record_id, status::SUCCESS, None, None).await
    }

    /// Finalize a record as failed with error detail.
    pub async fn mark_failed(&self, record_id: Uuid, error: &str) -> Result<(), MarketError> {
        self.finalize(record_id, status::FAILED, None, Some(error))
            .await
    }

    /// Finalize a record as skipped with the reason it was never submitted.
    pub async fn mark_skipped(&self, record_id: Uuid, reason: &str) -> Result<(), MarketError> {
        self.finalize(record_id, status::SKIPPED, Some(reason), None)
            .await
    }

    async fn finalize(
        &self,
        record_id: Uuid,
        new_status: &str,
        skip_reason: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), MarketError> {
        let now_tz = DateTimeWithTimeZone::from(Utc::now());

        // Records are immutable once terminal; only pending rows move.
        Entity::update_many()
            .col_expr(Column::Status, Expr::value(new_status))
            .col_expr(Column::SkipReason, Expr::value(skip_reason))
            .col_expr(Column::Error, Expr::value(error))
            .col_expr(Column::UpdatedAt, Expr::value(now_tz))
            .filter(Column::Id.eq(record_id))
            .filter(Column::Status.eq(status::PENDING))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    /// Target ids already recorded for (account, kind, logical day), used
    /// to keep idempotent actions from being submitted twice.
    pub async fn recorded_targets(
        &self,
        account_id: Uuid,
        action_kind: &str,
        action_date: NaiveDate,
    ) -> Result<Vec<String>, MarketError> {
        let rows = Entity::find()
            .select_only()
            .column(Column::TargetId)
            .filter(Column::AccountId.eq(account_id))
            .filter(Column::ActionKind.eq(action_kind))
            .filter(Column::ActionDate.eq(action_date))
            .filter(Column::Status.ne(status::FAILED))
            .into_tuple::<String>()
            .all(&*self.db)
            .await?;
        Ok(rows)
    }

    /// List records for an account, newest first (audit view).
    pub async fn list_by_account(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        action_kind: Option<&str>,
        limit: u64,
    ) -> Result<Vec<Model>, MarketError> {
        let mut query = Entity::find()
            .filter(Column::TenantId.eq(tenant_id))
            .filter(Column::AccountId.eq(account_id))
            .order_by_desc(Column::CreatedAt)
            .limit(limit);

        if let Some(kind) = action_kind {
            query = query.filter(Column::ActionKind.eq(kind));
        }

        Ok(query.all(&*self.db).await?)
    }
}
