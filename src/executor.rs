//! Job executor: leases pending jobs and drives them to completion.
//!
//! Each tick leases a bounded batch per job kind, runs the jobs
//! concurrently under a wall-clock budget, and settles every outcome:
//! completed, requeued with backoff, or permanently failed once the
//! attempt budget is spent. Rate-limit hints from the platform take
//! precedence over exponential backoff.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use rand::Rng;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::audit::{AuditEvent, AuditSink};
use crate::batch::{BatchActionProcessor, BatchRunReport};
use crate::chunker::{ChunkPlanner, PlanOutcome};
use crate::config::{QueueConfig, RetryPolicyConfig};
use crate::error::MarketError;
use crate::models::sync_job::{self, JobPayload, kind};
use crate::repositories::run_health::RunOutcome;
use crate::repositories::{RunHealthRepository, SyncJobRepository};

/// Backoff before the next attempt.
///
/// An explicit retry-after hint from the platform wins outright; otherwise
/// exponential backoff doubles from the base per prior attempt, capped at
/// the policy maximum, with multiplicative jitter on top.
pub fn calculate_backoff(
    policy: &RetryPolicyConfig,
    attempts: i32,
    retry_after_hint: Option<u64>,
) -> Duration {
    if let Some(hint) = retry_after_hint {
        return Duration::seconds(hint as i64);
    }

    let exponent = attempts.saturating_sub(1).clamp(0, 16) as u32;
    let raw = policy
        .base_seconds
        .saturating_mul(2u64.saturating_pow(exponent))
        .min(policy.max_seconds);

    let jitter = if policy.jitter_factor > 0.0 {
        let span = (raw as f64 * policy.jitter_factor).max(0.0);
        rand::thread_rng().gen_range(0.0..=span)
    } else {
        0.0
    };

    Duration::seconds((raw as f64 + jitter) as i64)
}

/// What the executor decided for one finished job.
#[derive(Debug)]
enum Settlement {
    Completed,
    Requeued,
    Failed,
}

/// Leases and executes queued jobs until shutdown.
#[derive(Clone)]
pub struct JobExecutor {
    jobs: SyncJobRepository,
    chunker: ChunkPlanner,
    batch: BatchActionProcessor,
    audit: Arc<dyn AuditSink>,
    health: RunHealthRepository,
    queue: QueueConfig,
    retry: RetryPolicyConfig,
}

impl JobExecutor {
    pub fn new(
        jobs: SyncJobRepository,
        chunker: ChunkPlanner,
        batch: BatchActionProcessor,
        audit: Arc<dyn AuditSink>,
        health: RunHealthRepository,
        queue: QueueConfig,
        retry: RetryPolicyConfig,
    ) -> Self {
        Self {
            jobs,
            chunker,
            batch,
            audit,
            health,
            queue,
            retry,
        }
    }

    /// Main loop: tick until the token is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(StdDuration::from_millis(self.queue.tick_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            tick_ms = self.queue.tick_ms,
            claim_batch = self.queue.claim_batch,
            "Job executor started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Job executor shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// One pass: lease and execute jobs of every kind.
    pub async fn tick(&self) {
        for job_kind in [kind::CHUNK, kind::FULL_SYNC, kind::BATCH_ACTION] {
            if let Err(error) = self.tick_kind(job_kind).await {
                tracing::error!(job_kind, error = %error, "Executor tick failed");
            }
        }
    }

    async fn tick_kind(&self, job_kind: &str) -> Result<(), MarketError> {
        let lease = Duration::seconds(self.queue.lease_seconds as i64);
        let claimed = self
            .jobs
            .lease_next(job_kind, lease, self.queue.claim_batch)
            .await?;

        if claimed.is_empty() {
            return Ok(());
        }

        let mut set = JoinSet::new();
        for job in claimed {
            let executor = self.clone();
            set.spawn(async move { executor.execute_and_settle(job).await });
        }

        while let Some(joined) = set.join_next().await {
            if let Err(join_error) = joined {
                tracing::error!(error = %join_error, "Job task panicked");
            }
        }

        Ok(())
    }

    /// Run one leased job within the invocation budget and settle it.
    async fn execute_and_settle(&self, job: sync_job::Model) -> Settlement {
        let budget = StdDuration::from_secs(self.queue.max_run_seconds);
        let outcome = tokio::time::timeout(budget, self.execute(&job)).await;

        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(MarketError::Platform {
                code: None,
                message: format!(
                    "job exceeded the {}s invocation budget",
                    self.queue.max_run_seconds
                ),
            }),
        };

        match result {
            Ok(()) => {
                if let Err(error) = self.jobs.complete(job.id).await {
                    tracing::error!(job_id = %job.id, error = %error, "Failed to complete job");
                }
                self.audit.record(AuditEvent::JobCompleted {
                    job_id: job.id,
                    account_id: job.account_id,
                    job_kind: job.job_kind.clone(),
                    attempts: job.attempts,
                });
                self.record_run_health(&job, None).await;
                Settlement::Completed
            }
            Err(error) => self.settle_failure(&job, error).await,
        }
    }

    async fn execute(&self, job: &sync_job::Model) -> Result<(), MarketError> {
        tracing::debug!(
            job_id = %job.id,
            job_kind = %job.job_kind,
            account_id = %job.account_id,
            attempt = job.attempts,
            "Executing job"
        );

        match job.job_kind.as_str() {
            kind::FULL_SYNC => {
                match self.chunker.plan(job).await? {
                    PlanOutcome::Inline { units } => {
                        tracing::info!(job_id = %job.id, units, "Sync completed inline");
                    }
                    PlanOutcome::Chunked { total_chunks } => {
                        tracing::info!(job_id = %job.id, total_chunks, "Sync fanned out");
                    }
                }
                Ok(())
            }
            kind::CHUNK => {
                self.chunker.run_chunk(job).await?;
                Ok(())
            }
            kind::BATCH_ACTION => {
                match self.batch.run(job).await? {
                    BatchRunReport::CircuitOpen => {
                        // Nothing to do until an operator resets the breaker.
                    }
                    BatchRunReport::Ran {
                        submitted,
                        succeeded,
                        failed,
                        skipped,
                    } => {
                        self.audit.record(AuditEvent::BatchRunFinished {
                            account_id: job.account_id,
                            job_kind: job.job_kind.clone(),
                            submitted,
                            succeeded,
                            failed,
                            skipped,
                        });
                    }
                }
                Ok(())
            }
            other => Err(MarketError::Validation(format!(
                "unknown job kind '{}'",
                other
            ))),
        }
    }

    async fn settle_failure(&self, job: &sync_job::Model, error: MarketError) -> Settlement {
        let exhausted = job.attempts >= self.queue.max_attempts;
        let permanent = !error.is_retryable() || exhausted;

        if permanent {
            tracing::warn!(
                job_id = %job.id,
                job_kind = %job.job_kind,
                attempts = job.attempts,
                error = %error,
                "Job failed permanently"
            );

            if job.job_kind == kind::CHUNK {
                self.report_chunk_failure(job, &error).await;
            }

            let job_error = error.to_job_error();
            if let Err(db_error) = self.jobs.mark_failed(job.id, job_error.clone()).await {
                tracing::error!(job_id = %job.id, error = %db_error, "Failed to mark job failed");
            }
            self.audit.record(AuditEvent::JobFailed {
                job_id: job.id,
                account_id: job.account_id,
                job_kind: job.job_kind.clone(),
                attempts: job.attempts,
                error: job_error,
            });
            self.record_run_health(job, Some(error.to_string())).await;
            return Settlement::Failed;
        }

        let backoff = calculate_backoff(&self.retry, job.attempts, error.retry_after_seconds());
        let retry_at = Utc::now() + backoff;

        tracing::info!(
            job_id = %job.id,
            job_kind = %job.job_kind,
            attempt = job.attempts,
            backoff_seconds = backoff.num_seconds(),
            error = %error,
            "Job requeued for retry"
        );

        if let Err(db_error) = self
            .jobs
            .requeue(job.id, error.to_job_error(), retry_at)
            .await
        {
            tracing::error!(job_id = %job.id, error = %db_error, "Failed to requeue job");
        }
        Settlement::Requeued
    }

    /// Upsert RunHealth on terminal settlement of a sync job, so permanent
    /// failures and `ReauthRequired` surface in `last_error` for operator
    /// dashboards. Batch-action runs record their own outcome inside the
    /// processor, counting per-item results.
    async fn record_run_health(&self, job: &sync_job::Model, run_error: Option<String>) {
        if job.job_kind == kind::BATCH_ACTION {
            return;
        }

        let outcome = match run_error {
            None => RunOutcome {
                success_count: 1,
                failure_count: 0,
                skip_count: 0,
                run_error: None,
            },
            Some(message) => RunOutcome {
                success_count: 0,
                failure_count: 1,
                skip_count: 0,
                run_error: Some(message),
            },
        };

        if let Err(error) = self
            .health
            .record_run(job.tenant_id, job.account_id, &job.job_kind, &outcome)
            .await
        {
            tracing::error!(
                job_id = %job.id,
                job_kind = %job.job_kind,
                error = %error,
                "Failed to record run health"
            );
        }
    }

    /// A chunk out of attempts still counts against its run: the tracker
    /// records the failed index so the run can finish with partial results.
    async fn report_chunk_failure(&self, job: &sync_job::Model, error: &MarketError) {
        let payload = JobPayload::from_column(job.payload.as_ref());
        let (Some(run_id), Some(chunk_index)) = (payload.run_id, payload.chunk_index) else {
            tracing::error!(job_id = %job.id, "Chunk job missing run_id/chunk_index in payload");
            return;
        };

        if let Err(report_error) = self
            .chunker
            .report_chunk(run_id, chunk_index, 0, false, Some(&error.to_string()))
            .await
        {
            tracing::error!(
                job_id = %job.id,
                run_id = %run_id,
                error = %report_error,
                "Failed to record chunk failure"
            );
        }
    }
}
