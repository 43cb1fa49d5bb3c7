//! # RunHealth Repository
//!
//! Aggregate run bookkeeping per (account, job kind). The consecutive
//! error counter feeds the circuit breaker that gates automatic runs.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use uuid::Uuid;

use crate::error::MarketError;
use crate::models::run_health::{self, Column, Entity, Model};

/// Outcome of one run, as reported by the batch processor or chunk tracker.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub success_count: i32,
    pub failure_count: i32,
    pub skip_count: i32,
    /// Run-level error. Per-item failures do not set this; only a failure
    /// of the run itself (e.g., the whole batch call errored) does.
    pub run_error: Option<String>,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.run_error.is_none()
    }
}

/// Repository for run health database operations
#[derive(Debug, Clone)]
pub struct RunHealthRepository {
    db: Arc<DatabaseConnection>,
}

impl RunHealthRepository {
    /// Create a new RunHealthRepository with the given database connection
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Fetch the health row for an (account, kind) pair.
    pub async fn get(
        &self,
        account_id: Uuid,
        job_kind: &str,
    ) -> Result<Option<Model>, MarketError> {
        Ok(Entity::find()
            .filter(Column::AccountId.eq(account_id))
            .filter(Column::JobKind.eq(job_kind))
            .one(&*self.db)
            .await?)
    }

    /// Whether the circuit breaker is open for this (account, kind):
    /// `threshold` or more consecutive failed runs disable automatic
    /// triggering until a manual reset.
    pub async fn is_circuit_open(
        &self,
        account_id: Uuid,
        job_kind: &str,
        threshold: i32,
    ) -> Result<bool, MarketError> {
        Ok(self
            .get(account_id, job_kind)
            .await?
            .map(|health| health.consecutive_errors >= threshold)
            .unwrap_or(false))
    }

    /// Flip the running flag for the pair, creating the row if needed.
    pub async fn set_running(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        job_kind: &str,
        is_running: bool,
    ) -> Result<(), MarketError> {
        let now_tz = DateTimeWithTimeZone::from(Utc::now());

        match self.get(account_id, job_kind).await? {
            Some(found) => {
                let mut active: run_health::ActiveModel = found.into();
                active.is_running = Set(is_running);
                active.updated_at = Set(now_tz);
                active.update(&*self.db).await?;
            }
            None => {
                self.insert_row(tenant_id, account_id, job_kind, is_running)
                    .await?;
            }
        }
        Ok(())
    }

    /// Upsert the health row after a run, regardless of outcome.
    ///
    /// A successful run resets `consecutive_errors` to zero; a failed run
    /// increments it. Returns the updated model.
    pub async fn record_run(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        job_kind: &str,
        outcome: &RunOutcome,
    ) -> Result<Model, MarketError> {
        let now_tz = DateTimeWithTimeZone::from(Utc::now());

        let existing = self.get(account_id, job_kind).await?;

        let model = match existing {
            Some(found) => {
                let consecutive = if outcome.succeeded() {
                    0
                } else {
                    found.consecutive_errors + 1
                };

                let mut active: run_health::ActiveModel = found.clone().into();
                active.is_running = Set(false);
                active.last_run_at = Set(Some(now_tz));
                active.total_success_count =
                    Set(found.total_success_count + i64::from(outcome.success_count));
                active.last_success_count = Set(outcome.success_count);
                active.last_failure_count = Set(outcome.failure_count);
                active.last_skip_count = Set(outcome.skip_count);
                active.last_error = Set(outcome.run_error.clone());
                active.consecutive_errors = Set(consecutive);
                active.updated_at = Set(now_tz);
                active.update(&*self.db).await?
            }
            None => {
                let id = Uuid::new_v4();
                let active = run_health::ActiveModel {
                    id: Set(id),
                    tenant_id: Set(tenant_id),
                    account_id: Set(account_id),
                    job_kind: Set(job_kind.to_string()),
                    is_running: Set(false),
                    last_run_at: Set(Some(now_tz)),
                    total_success_count: Set(i64::from(outcome.success_count)),
                    last_success_count: Set(outcome.success_count),
                    last_failure_count: Set(outcome.failure_count),
                    last_skip_count: Set(outcome.skip_count),
                    last_error: Set(outcome.run_error.clone()),
                    consecutive_errors: Set(if outcome.succeeded() { 0 } else { 1 }),
                    created_at: Set(now_tz),
                    updated_at: Set(now_tz),
                };
                active.insert(&*self.db).await?;
                Entity::find_by_id(id).one(&*self.db).await?.ok_or_else(|| {
                    MarketError::Db(sea_orm::DbErr::RecordNotFound(id.to_string()))
                })?
            }
        };

        if !outcome.succeeded() {
            metrics::counter!("marketsync_runs_failed_total").increment(1);
        }

        Ok(model)
    }

    /// Manual circuit breaker reset.
    pub async fn reset_errors(
        &self,
        account_id: Uuid,
        job_kind: &str,
    ) -> Result<bool, MarketError> {
        let now_tz = DateTimeWithTimeZone::from(Utc::now());

        let result = Entity::update_many()
            .col_expr(
                Column::ConsecutiveErrors,
                sea_orm::sea_query::Expr::value(0i32),
            )
            .col_expr(
                Column::LastError,
                sea_orm::sea_query::Expr::value(None::<String>),
            )
            .col_expr(Column::UpdatedAt, sea_orm::sea_query::Expr::value(now_tz))
            .filter(Column::AccountId.eq(account_id))
            .filter(Column::JobKind.eq(job_kind))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// List health rows for a tenant (dashboard surface).
    pub async fn list_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<Model>, MarketError> {
        Ok(Entity::find()
            .filter(Column::TenantId.eq(tenant_id))
            .all(&*self.db)
            .await?)
    }

    async fn insert_row(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        job_kind: &str,
        is_running: bool,
    ) -> Result<(), MarketError> {
        let now_tz = DateTimeWithTimeZone::from(Utc::now());

        let active = run_health::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            account_id: Set(account_id),
            job_kind: Set(job_kind.to_string()),
            is_running: Set(is_running),
            last_run_at: Set(None),
            total_success_count: Set(0),
            last_success_count: Set(0),
            last_failure_count: Set(0),
            last_skip_count: Set(0),
            last_error: Set(None),
            consecutive_errors: Set(0),
            created_at: Set(now_tz),
            updated_at: Set(now_tz),
        };
        active.insert(&*self.db).await?;
        Ok(())
    }
}
