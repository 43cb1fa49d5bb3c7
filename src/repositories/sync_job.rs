//! # SyncJob Repository
//!
//! Repository operations for the sync_jobs table: the durable work queue.
//! Claiming runs inside a transaction so concurrent workers never lease the
//! same row, and never lease two jobs of one kind for the same account.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    QueryTrait, Set, TransactionTrait,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::MarketError;
use crate::models::sync_job::{self, Column, Entity, Model, status};

/// Repository for sync job database operations
#[derive(Debug, Clone)]
pub struct SyncJobRepository {
    db: Arc<DatabaseConnection>,
}

impl SyncJobRepository {
    /// Create a new SyncJobRepository with the given database connection
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Enqueue a new pending job.
    pub async fn enqueue(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        job_kind: &str,
        payload: Option<JsonValue>,
        scheduled_at: DateTime<Utc>,
        priority: i16,
    ) -> Result<Model, MarketError> {
        let now = Utc::now();
        let id = Uuid::new_v4();

        let job = sync_job::ActiveModel {
            id: Set(id),
            tenant_id: Set(tenant_id),
            account_id: Set(account_id),
            job_kind: Set(job_kind.to_string()),
            status: Set(status::PENDING.to_string()),
            priority: Set(priority),
            attempts: Set(0),
            scheduled_at: Set(scheduled_at.into()),
            lease_expires_at: Set(None),
            retry_after: Set(None),
            started_at: Set(None),
            finished_at: Set(None),
            payload: Set(payload),
            error: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        use sea_orm::ActiveModelTrait;
        job.insert(&*self.db).await?;

        let fetched = Entity::find_by_id(id).one(&*self.db).await?;
        let model = fetched
            .ok_or_else(|| MarketError::Db(sea_orm::DbErr::RecordNotFound(id.to_string())))?;

        tracing::info!(
            tenant_id = %tenant_id,
            account_id = %account_id,
            job_kind = %job_kind,
            job_id = %model.id,
            "Sync job enqueued"
        );

        Ok(model)
    }

    /// Enqueue a set of jobs in one transaction (used for chunk fan-out).
    pub async fn enqueue_many(
        &self,
        jobs: Vec<sync_job::ActiveModel>,
    ) -> Result<usize, MarketError> {
        if jobs.is_empty() {
            return Ok(0);
        }

        let count = jobs.len();
        let txn = self.db.begin().await?;
        Entity::insert_many(jobs).exec(&txn).await?;
        txn.commit().await?;
        Ok(count)
    }

    /// Atomically lease up to `batch` eligible pending jobs of one kind.
    ///
    /// Eligibility: status=pending, scheduled and past any retry backoff,
    /// and the account has no leased job of the same kind. At most one job
    /// per account is leased per call. Claiming stamps
    /// `lease_expires_at = now + lease_duration` and bumps the attempt
    /// counter.
    pub async fn lease_next(
        &self,
        job_kind: &str,
        lease_duration: Duration,
        batch: usize,
    ) -> Result<Vec<Model>, MarketError> {
        let now = Utc::now();
        let now_tz = DateTimeWithTimeZone::from(now);
        let lease_tz = DateTimeWithTimeZone::from(now + lease_duration);

        let txn = self.db.begin().await?;

        // Accounts that already hold a lease for this kind are excluded.
        let leased_accounts = Entity::find()
            .select_only()
            .column(Column::AccountId)
            .filter(Column::Status.eq(status::LEASED))
            .filter(Column::JobKind.eq(job_kind))
            .into_query();

        let candidates = Entity::find()
            .filter(Column::Status.eq(status::PENDING))
            .filter(Column::JobKind.eq(job_kind))
            .filter(Column::ScheduledAt.lte(now_tz))
            .filter(
                Condition::any()
                    .add(Column::RetryAfter.is_null())
                    .add(Column::RetryAfter.lte(now_tz)),
            )
            .filter(Column::AccountId.not_in_subquery(leased_accounts))
            .order_by_desc(Column::Priority)
            .order_by_asc(Column::ScheduledAt)
            .order_by_asc(Column::CreatedAt)
            .limit((batch * 4) as u64)
            .all(&txn)
            .await?;

        // One job per account within a single claim.
        let mut seen_accounts = HashSet::new();
        let chosen: Vec<Uuid> = candidates
            .into_iter()
            .filter(|job| seen_accounts.insert(job.account_id))
            .take(batch)
            .map(|job| job.id)
            .collect();

        if chosen.is_empty() {
            txn.commit().await?;
            return Ok(Vec::new());
        }

        // The status guard makes the flip idempotent against racing claimers.
        Entity::update_many()
            .col_expr(Column::Status, Expr::value(status::LEASED))
            .col_expr(Column::LeaseExpiresAt, Expr::value(Some(lease_tz)))
            .col_expr(Column::Attempts, Expr::col(Column::Attempts).add(1))
            .col_expr(Column::StartedAt, Expr::value(Some(now_tz)))
            .col_expr(Column::UpdatedAt, Expr::value(now_tz))
            .filter(Column::Id.is_in(chosen.clone()))
            .filter(Column::Status.eq(status::PENDING))
            .exec(&txn)
            .await?;

        // Re-select by this call's own stamp so a claimer that lost the
        // status guard cannot return rows another transaction flipped.
        let claimed = Entity::find()
            .filter(Column::Id.is_in(chosen))
            .filter(Column::Status.eq(status::LEASED))
            .filter(Column::StartedAt.eq(now_tz))
            .order_by_asc(Column::ScheduledAt)
            .all(&txn)
            .await?;

        txn.commit().await?;

        if !claimed.is_empty() {
            tracing::debug!(
                job_kind = %job_kind,
                claimed = claimed.len(),
                "Leased jobs for execution"
            );
            metrics::counter!("marketsync_jobs_leased_total").increment(claimed.len() as u64);
        }

        Ok(claimed)
    }

    /// Mark a job completed and clear its lease.
    pub async fn complete(&self, job_id: Uuid) -> Result<(), MarketError> {
        let now_tz = DateTimeWithTimeZone::from(Utc::now());

        Entity::update_many()
            .col_expr(Column::Status, Expr::value(status::COMPLETED))
            .col_expr(
                Column::LeaseExpiresAt,
                Expr::value(None::<DateTimeWithTimeZone>),
            )
            .col_expr(Column::FinishedAt, Expr::value(Some(now_tz)))
            .col_expr(Column::UpdatedAt, Expr::value(now_tz))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.eq(status::LEASED))
            .exec(&*self.db)
            .await?;

        metrics::counter!("marketsync_jobs_completed_total").increment(1);
        Ok(())
    }

    /// Requeue a failed job for a later retry.
    pub async fn requeue(
        &self,
        job_id: Uuid,
        error: JsonValue,
        retry_at: DateTime<Utc>,
    ) -> Result<(), MarketError> {
        let now_tz = DateTimeWithTimeZone::from(Utc::now());

        Entity::update_many()
            .col_expr(Column::Status, Expr::value(status::PENDING))
            .col_expr(
                Column::LeaseExpiresAt,
                Expr::value(None::<DateTimeWithTimeZone>),
            )
            .col_expr(
                Column::RetryAfter,
                Expr::value(Some(DateTimeWithTimeZone::from(retry_at))),
            )
            .col_expr(Column::Error, Expr::value(Some(error)))
            .col_expr(Column::UpdatedAt, Expr::value(now_tz))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.eq(status::LEASED))
            .exec(&*self.db)
            .await?;

        metrics::counter!("marketsync_jobs_requeued_total").increment(1);
        Ok(())
    }

    /// Mark a job permanently failed.
    pub async fn mark_failed(&self, job_id: Uuid, error: JsonValue) -> Result<(), MarketError> {
        let now_tz = DateTimeWithTimeZone::from(Utc::now());

        Entity::update_many()
            .col_expr(Column::Status, Expr::value(status::FAILED))
            .col_expr(
                Column::LeaseExpiresAt,
                Expr::value(None::<DateTimeWithTimeZone>),
            )
            .col_expr(Column::Error, Expr::value(Some(error)))
            .col_expr(Column::FinishedAt, Expr::value(Some(now_tz)))
            .col_expr(Column::UpdatedAt, Expr::value(now_tz))
            .filter(Column::Id.eq(job_id))
            .exec(&*self.db)
            .await?;

        metrics::counter!("marketsync_jobs_failed_total").increment(1);
        Ok(())
    }

    /// Reset leased jobs whose lease expired back to pending.
    ///
    /// Returns the number of reclaimed jobs.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, MarketError> {
        let now_tz = DateTimeWithTimeZone::from(now);

        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(status::PENDING))
            .col_expr(
                Column::LeaseExpiresAt,
                Expr::value(None::<DateTimeWithTimeZone>),
            )
            .col_expr(Column::UpdatedAt, Expr::value(now_tz))
            .filter(Column::Status.eq(status::LEASED))
            .filter(Column::LeaseExpiresAt.is_not_null())
            .filter(Column::LeaseExpiresAt.lt(now_tz))
            .exec(&*self.db)
            .await?;

        if result.rows_affected > 0 {
            metrics::counter!("marketsync_leases_reclaimed_total")
                .increment(result.rows_affected);
        }

        Ok(result.rows_affected)
    }

    /// Fetch a job by id.
    pub async fn get(&self, job_id: Uuid) -> Result<Option<Model>, MarketError> {
        Ok(Entity::find_by_id(job_id).one(&*self.db).await?)
    }

    /// Find a sync job by ID, ensuring it belongs to the specified tenant
    pub async fn find_by_tenant(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
    ) -> Result<Option<Model>, MarketError> {
        Ok(Entity::find_by_id(job_id)
            .filter(Column::TenantId.eq(tenant_id))
            .one(&*self.db)
            .await?)
    }

    /// List sync jobs for a tenant with optional filtering
    pub async fn list_by_tenant(
        &self,
        tenant_id: Uuid,
        account_id: Option<Uuid>,
        job_kind: Option<String>,
        status: Option<String>,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<Model>, MarketError> {
        let mut query = Entity::find()
            .filter(Column::TenantId.eq(tenant_id))
            .order_by_desc(Column::CreatedAt);

        if let Some(account) = account_id {
            query = query.filter(Column::AccountId.eq(account));
        }

        if let Some(kind) = job_kind {
            query = query.filter(Column::JobKind.eq(kind));
        }

        if let Some(status_filter) = status {
            query = query.filter(Column::Status.eq(status_filter));
        }

        let results = query
            .offset(offset.unwrap_or(0))
            .limit(limit.unwrap_or(100))
            .all(&*self.db)
            .await?;

        Ok(results)
    }
}
