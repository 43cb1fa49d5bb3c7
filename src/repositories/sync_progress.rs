//! # SyncProgress Repository
//!
//! Tracks one chunked (or inline) sync run per (account, sync kind).
//! Chunk reports are applied in a transaction so units_completed stays
//! monotonic and the terminal transition fires exactly once, when the last
//! planned chunk has reported.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde_json::json;
use uuid::Uuid;

use crate::error::MarketError;
use crate::models::sync_progress::{
    self, Column, Entity, Model, failed_chunks_from_column, stage,
};

/// Repository for sync progress database operations
#[derive(Debug, Clone)]
pub struct SyncProgressRepository {
    db: Arc<DatabaseConnection>,
}

impl SyncProgressRepository {
    /// Create a new SyncProgressRepository with the given database connection
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Initialize (or re-initialize) the run row for an (account, kind)
    /// pair at planning time. The totals captured here are authoritative
    /// for the whole run, even if upstream counts drift afterwards.
    pub async fn start_run(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        sync_kind: &str,
        total_units: i64,
        chunk_size: i64,
        total_chunks: i32,
    ) -> Result<Model, MarketError> {
        let now = Utc::now();
        let now_tz = DateTimeWithTimeZone::from(now);

        let existing = Entity::find()
            .filter(Column::AccountId.eq(account_id))
            .filter(Column::SyncKind.eq(sync_kind))
            .one(&*self.db)
            .await?;

        let model = match existing {
            Some(found) => {
                // Reuse the row for the new run; stage history does not
                // survive a re-plan.
                let mut active: sync_progress::ActiveModel = found.into();
                active.total_units = Set(total_units);
                active.units_completed = Set(0);
                active.chunk_size = Set(chunk_size);
                active.total_chunks = Set(total_chunks);
                active.chunks_reported = Set(0);
                active.stage = Set(stage::PLANNING.to_string());
                active.failed_chunks = Set(Some(json!([])));
                active.last_error = Set(None);
                active.started_at = Set(Some(now_tz));
                active.finished_at = Set(None);
                active.updated_at = Set(now_tz);
                active.update(&*self.db).await?
            }
            None => {
                let id = Uuid::new_v4();
                let active = sync_progress::ActiveModel {
                    id: Set(id),
                    tenant_id: Set(tenant_id),
                    account_id: Set(account_id),
                    sync_kind: Set(sync_kind.to_string()),
                    total_units: Set(total_units),
                    units_completed: Set(0),
                    chunk_size: Set(chunk_size),
                    total_chunks: Set(total_chunks),
                    chunks_reported: Set(0),
                    stage: Set(stage::PLANNING.to_string()),
                    failed_chunks: Set(Some(json!([]))),
                    last_error: Set(None),
                    started_at: Set(Some(now_tz)),
                    finished_at: Set(None),
                    created_at: Set(now_tz),
                    updated_at: Set(now_tz),
                };
                active.insert(&*self.db).await?;
                Entity::find_by_id(id).one(&*self.db).await?.ok_or_else(|| {
                    MarketError::Db(sea_orm::DbErr::RecordNotFound(id.to_string()))
                })?
            }
        };

        Ok(model)
    }

    /// Fetch a run by id.
    pub async fn get(&self, run_id: Uuid) -> Result<Option<Model>, MarketError> {
        Ok(Entity::find_by_id(run_id).one(&*self.db).await?)
    }

    /// Fetch the run row for an (account, kind) pair.
    pub async fn get_by_account_kind(
        &self,
        account_id: Uuid,
        sync_kind: &str,
    ) -> Result<Option<Model>, MarketError> {
        Ok(Entity::find()
            .filter(Column::AccountId.eq(account_id))
            .filter(Column::SyncKind.eq(sync_kind))
            .one(&*self.db)
            .await?)
    }

    /// Advance the run's stage (forward-only transitions).
    pub async fn set_stage(&self, run_id: Uuid, new_stage: &str) -> Result<(), MarketError> {
        let now_tz = DateTimeWithTimeZone::from(Utc::now());

        Entity::update_many()
            .col_expr(Column::Stage, sea_orm::sea_query::Expr::value(new_stage))
            .col_expr(Column::UpdatedAt, sea_orm::sea_query::Expr::value(now_tz))
            .filter(Column::Id.eq(run_id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    /// Record one chunk's completion report.
    ///
    /// Increments `units_completed` (clamped to the planned total) and
    /// appends failed chunk indices instead of aborting the run. Once every
    /// planned chunk has reported the run moves to `reconciling`; callers
    /// then invoke [`Self::finalize`] for the terminal transition. Returns
    /// the updated run.
    pub async fn update_chunk_progress(
        &self,
        run_id: Uuid,
        chunk_index: u32,
        units_synced: i64,
        success: bool,
        error: Option<&str>,
    ) -> Result<Model, MarketError> {
        let now_tz = DateTimeWithTimeZone::from(Utc::now());

        let txn = self.db.begin().await?;

        let run = Entity::find_by_id(run_id).one(&txn).await?.ok_or_else(|| {
            MarketError::Db(sea_orm::DbErr::RecordNotFound(run_id.to_string()))
        })?;

        let mut failed = failed_chunks_from_column(run.failed_chunks.as_ref());
        if !success && !failed.contains(&chunk_index) {
            failed.push(chunk_index);
            failed.sort_unstable();
        }

        let units_completed = (run.units_completed + units_synced.max(0)).min(run.total_units);
        let chunks_reported = (run.chunks_reported + 1).min(run.total_chunks);
        let all_reported = chunks_reported >= run.total_chunks;

        let mut active: sync_progress::ActiveModel = run.clone().into();
        active.units_completed = Set(units_completed);
        active.chunks_reported = Set(chunks_reported);
        active.failed_chunks = Set(Some(json!(failed)));
        if let Some(message) = error {
            active.last_error = Set(Some(message.to_string()));
        }

        if all_reported {
            active.stage = Set(stage::RECONCILING.to_string());
        }
        active.updated_at = Set(now_tz);

        let updated = active.update(&txn).await?;
        txn.commit().await?;

        tracing::info!(
            run_id = %run_id,
            chunk_index,
            units_synced,
            success,
            chunks_reported = updated.chunks_reported,
            total_chunks = updated.total_chunks,
            stage = %updated.stage,
            "Chunk progress recorded"
        );

        Ok(updated)
    }

    /// Terminal transition for a reconciling run: `completed` when no chunk
    /// failed, `failed` otherwise. Returns the finalized run.
    pub async fn finalize(&self, run_id: Uuid) -> Result<Model, MarketError> {
        let now_tz = DateTimeWithTimeZone::from(Utc::now());

        let run = Entity::find_by_id(run_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| MarketError::Db(sea_orm::DbErr::RecordNotFound(run_id.to_string())))?;

        if run.stage != stage::RECONCILING {
            return Ok(run);
        }

        let failed = failed_chunks_from_column(run.failed_chunks.as_ref());
        let terminal = if failed.is_empty() {
            stage::COMPLETED
        } else {
            stage::FAILED
        };

        let mut active: sync_progress::ActiveModel = run.into();
        active.stage = Set(terminal.to_string());
        active.finished_at = Set(Some(now_tz));
        active.updated_at = Set(now_tz);

        Ok(active.update(&*self.db).await?)
    }

    /// Mark an inline (unchunked) run completed with the given unit count.
    pub async fn complete_inline(
        &self,
        run_id: Uuid,
        units_synced: i64,
    ) -> Result<Model, MarketError> {
        let now_tz = DateTimeWithTimeZone::from(Utc::now());

        let run = Entity::find_by_id(run_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| MarketError::Db(sea_orm::DbErr::RecordNotFound(run_id.to_string())))?;

        let units = units_synced.max(0).min(run.total_units);
        let total_chunks = run.total_chunks;

        let mut active: sync_progress::ActiveModel = run.into();
        active.units_completed = Set(units);
        active.chunks_reported = Set(total_chunks);
        active.stage = Set(stage::COMPLETED.to_string());
        active.finished_at = Set(Some(now_tz));
        active.updated_at = Set(now_tz);

        Ok(active.update(&*self.db).await?)
    }

    /// Mark a run failed at the run level (e.g., planning failed).
    pub async fn mark_failed(&self, run_id: Uuid, error: &str) -> Result<(), MarketError> {
        let now_tz = DateTimeWithTimeZone::from(Utc::now());

        Entity::update_many()
            .col_expr(Column::Stage, sea_orm::sea_query::Expr::value(stage::FAILED))
            .col_expr(
                Column::LastError,
                sea_orm::sea_query::Expr::value(Some(error)),
            )
            .col_expr(
                Column::FinishedAt,
                sea_orm::sea_query::Expr::value(Some(now_tz)),
            )
            .col_expr(Column::UpdatedAt, sea_orm::sea_query::Expr::value(now_tz))
            .filter(Column::Id.eq(run_id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    /// Manual reset back to idle: the only allowed backwards stage move.
    pub async fn reset(&self, run_id: Uuid) -> Result<(), MarketError> {
        let now_tz = DateTimeWithTimeZone::from(Utc::now());

        Entity::update_many()
            .col_expr(Column::Stage, sea_orm::sea_query::Expr::value(stage::IDLE))
            .col_expr(Column::UnitsCompleted, sea_orm::sea_query::Expr::value(0i64))
            .col_expr(Column::ChunksReported, sea_orm::sea_query::Expr::value(0i32))
            .col_expr(
                Column::FailedChunks,
                sea_orm::sea_query::Expr::value(Some(json!([]))),
            )
            .col_expr(
                Column::LastError,
                sea_orm::sea_query::Expr::value(None::<String>),
            )
            .col_expr(
                Column::FinishedAt,
                sea_orm::sea_query::Expr::value(None::<DateTimeWithTimeZone>),
            )
            .col_expr(Column::UpdatedAt, sea_orm::sea_query::Expr::value(now_tz))
            .filter(Column::Id.eq(run_id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    /// List runs for a tenant (operator visibility).
    pub async fn list_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<Model>, MarketError> {
        Ok(Entity::find()
            .filter(Column::TenantId.eq(tenant_id))
            .all(&*self.db)
            .await?)
    }
}
