//! # Sync Scheduler
//!
//! Background task that evaluates active accounts, applies jittered
//! intervals, and enqueues full-sync and batch-action jobs while keeping
//! at-most-once semantics per (account, kind). Cadence is derived from the
//! newest job row of each kind, so multiple instances coordinate through
//! the queue itself.

use std::sync::Arc;

use chrono::{Duration, Utc};
use metrics::{counter, histogram};
use rand::Rng;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use tokio::time::{Duration as TokioDuration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::config::{BatchConfig, SchedulerConfig};
use crate::error::{MarketError, is_unique_violation};
use crate::models::account;
use crate::models::sync_job::{Column as SyncJobColumn, Entity as SyncJob, kind, status};
use crate::repositories::{AccountRepository, RunHealthRepository, SyncJobRepository};

/// Background scheduler service.
pub struct JobScheduler {
    db: Arc<DatabaseConnection>,
    accounts: AccountRepository,
    jobs: SyncJobRepository,
    health: RunHealthRepository,
    config: SchedulerConfig,
    batch: BatchConfig,
}

#[derive(Debug, Default)]
struct TickStats {
    accounts_polled: u64,
    jobs_enqueued: u64,
    skipped_in_flight: u64,
    skipped_not_due: u64,
    skipped_circuit_open: u64,
}

impl JobScheduler {
    pub fn new(
        db: Arc<DatabaseConnection>,
        accounts: AccountRepository,
        jobs: SyncJobRepository,
        health: RunHealthRepository,
        config: SchedulerConfig,
        batch: BatchConfig,
    ) -> Self {
        Self {
            db,
            accounts,
            jobs,
            health,
            config,
            batch,
        }
    }

    /// Run the scheduler loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Starting job scheduler");
        let tick_interval = TokioDuration::from_secs(self.config.tick_interval_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Job scheduler shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = Instant::now();
                    if let Err(err) = self.tick().await {
                        error!(error = %err, "Scheduler tick failed");
                    }
                    histogram!("marketsync_scheduler_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Job scheduler stopped");
    }

    /// One scheduler pass over every active account.
    pub async fn tick(&self) -> Result<(), MarketError> {
        let mut stats = TickStats::default();

        for account in self.accounts.list_active().await? {
            stats.accounts_polled += 1;

            self.consider(
                &account,
                kind::FULL_SYNC,
                self.config.sync_interval_seconds,
                &mut stats,
            )
            .await;
            self.consider(
                &account,
                kind::BATCH_ACTION,
                self.config.action_interval_seconds,
                &mut stats,
            )
            .await;
        }

        counter!("marketsync_scheduler_jobs_enqueued_total").increment(stats.jobs_enqueued);
        debug!(
            accounts = stats.accounts_polled,
            enqueued = stats.jobs_enqueued,
            in_flight = stats.skipped_in_flight,
            not_due = stats.skipped_not_due,
            circuit_open = stats.skipped_circuit_open,
            "Scheduler tick finished"
        );

        Ok(())
    }

    async fn consider(
        &self,
        account: &account::Model,
        job_kind: &str,
        interval_seconds: u64,
        stats: &mut TickStats,
    ) {
        match self
            .evaluate(account, job_kind, interval_seconds, stats)
            .await
        {
            Ok(()) => {}
            Err(MarketError::Db(db_err)) if is_unique_violation(&db_err) => {
                // Another instance enqueued first; the queue guard held.
                debug!(
                    account_id = %account.id,
                    job_kind,
                    "Concurrent scheduler enqueue detected"
                );
            }
            Err(err) => {
                error!(
                    account_id = %account.id,
                    job_kind,
                    error = %err,
                    "Scheduling evaluation failed"
                );
            }
        }
    }

    async fn evaluate(
        &self,
        account: &account::Model,
        job_kind: &str,
        interval_seconds: u64,
        stats: &mut TickStats,
    ) -> Result<(), MarketError> {
        if job_kind == kind::BATCH_ACTION
            && self
                .health
                .is_circuit_open(account.id, job_kind, self.batch.cb_threshold)
                .await?
        {
            stats.skipped_circuit_open += 1;
            return Ok(());
        }

        if self.has_open_job(account.id, job_kind).await? {
            stats.skipped_in_flight += 1;
            return Ok(());
        }

        if !self.is_due(account.id, job_kind, interval_seconds).await? {
            stats.skipped_not_due += 1;
            return Ok(());
        }

        self.jobs
            .enqueue(account.tenant_id, account.id, job_kind, None, Utc::now(), 0)
            .await?;
        stats.jobs_enqueued += 1;
        Ok(())
    }

    /// A pending or leased job of this kind means the cadence slot is taken.
    async fn has_open_job(&self, account_id: Uuid, job_kind: &str) -> Result<bool, MarketError> {
        let open = SyncJob::find()
            .filter(SyncJobColumn::AccountId.eq(account_id))
            .filter(SyncJobColumn::JobKind.eq(job_kind))
            .filter(SyncJobColumn::Status.is_in([status::PENDING, status::LEASED]))
            .one(&*self.db)
            .await?;
        Ok(open.is_some())
    }

    /// Due when the newest job of this kind is older than the jittered
    /// interval, or when no job exists yet.
    async fn is_due(
        &self,
        account_id: Uuid,
        job_kind: &str,
        interval_seconds: u64,
    ) -> Result<bool, MarketError> {
        let latest = SyncJob::find()
            .filter(SyncJobColumn::AccountId.eq(account_id))
            .filter(SyncJobColumn::JobKind.eq(job_kind))
            .order_by_desc(SyncJobColumn::CreatedAt)
            .one(&*self.db)
            .await?;

        let Some(latest) = latest else {
            return Ok(true);
        };

        let jitter_pct = rand::thread_rng()
            .gen_range(self.config.jitter_pct_min..=self.config.jitter_pct_max);
        let effective = interval_seconds as f64 * (1.0 + jitter_pct);
        let due_at = latest.created_at.with_timezone(&Utc)
            + Duration::seconds(effective as i64);

        Ok(due_at <= Utc::now())
    }
}
