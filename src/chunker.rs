//! Chunk planner and progress tracking for oversized syncs.
//!
//! A full sync first asks the platform for the total unit count. Totals at
//! or below the inline threshold are fetched within the planning
//! invocation; anything larger is partitioned into `ceil(total/chunk_size)`
//! child chunk jobs, each carrying `{offset, limit, chunk_index, run_id}`.
//! The total captured at planning time stays authoritative even when the
//! upstream dataset drifts mid-run.

use chrono::Utc;
use sea_orm::Set;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::error::MarketError;
use crate::marketplace::ApiClient;
use crate::models::sync_job::{self, JobPayload, kind, status};
use crate::models::sync_progress;
use crate::repositories::{SyncJobRepository, SyncProgressRepository};

/// Default dataset path when a full-sync job carries no explicit one.
pub const DEFAULT_SYNC_PATH: &str = "/catalog/items";

/// What planning decided to do with a run.
#[derive(Debug, PartialEq, Eq)]
pub enum PlanOutcome {
    /// Total fit in one invocation; the work is already done.
    Inline { units: u64 },
    /// Child chunk jobs were enqueued to carry the remaining work.
    Chunked { total_chunks: u32 },
}

/// Number of chunks needed to cover `total` units.
pub fn total_chunks(total: u64, chunk_size: u64) -> u32 {
    debug_assert!(chunk_size > 0);
    total.div_ceil(chunk_size) as u32
}

/// Contiguous `(offset, limit)` slices covering `total` units.
pub fn plan_chunks(total: u64, chunk_size: u64) -> Vec<(u64, u64)> {
    let mut slices = Vec::with_capacity(total_chunks(total, chunk_size) as usize);
    let mut offset = 0;
    while offset < total {
        let limit = chunk_size.min(total - offset);
        slices.push((offset, limit));
        offset += limit;
    }
    slices
}

/// Plans full syncs and reports chunk completions into SyncProgress.
#[derive(Clone)]
pub struct ChunkPlanner {
    client: ApiClient,
    jobs: SyncJobRepository,
    progress: SyncProgressRepository,
    config: ChunkingConfig,
}

impl ChunkPlanner {
    pub fn new(
        client: ApiClient,
        jobs: SyncJobRepository,
        progress: SyncProgressRepository,
        config: ChunkingConfig,
    ) -> Self {
        Self {
            client,
            jobs,
            progress,
            config,
        }
    }

    /// Handle a leased full-sync job: query the total, then either sync
    /// inline or fan out chunk jobs. The parent job is done once children
    /// are scheduled; the children carry the remaining work.
    pub async fn plan(&self, job: &sync_job::Model) -> Result<PlanOutcome, MarketError> {
        let payload = JobPayload::from_column(job.payload.as_ref());
        let path = payload
            .path
            .unwrap_or_else(|| DEFAULT_SYNC_PATH.to_string());

        // A run with chunks still outstanding must not be replanned:
        // stale chunks would report into the fresh run's counters.
        if let Some(existing) = self
            .progress
            .get_by_account_kind(job.account_id, &path)
            .await?
        {
            if matches!(
                existing.stage.as_str(),
                sync_progress::stage::FETCHING_PHASE_ONE | sync_progress::stage::FETCHING_PHASE_TWO
            ) {
                return Err(MarketError::Validation(format!(
                    "a sync run for '{}' is still fetching; wait for it to finish or reset it",
                    path
                )));
            }
        }

        let total = self.client.count_units(job.account_id, &path).await?;
        let chunks = total_chunks(total, self.config.chunk_size);

        let run = self
            .progress
            .start_run(
                job.tenant_id,
                job.account_id,
                &path,
                total as i64,
                self.config.chunk_size as i64,
                chunks as i32,
            )
            .await?;

        tracing::info!(
            account_id = %job.account_id,
            path = %path,
            total,
            chunks,
            run_id = %run.id,
            "Planned sync run"
        );

        if total <= self.config.inline_threshold {
            let units = self.sync_inline(job.account_id, &path, total).await;
            return match units {
                Ok(units) => {
                    self.progress.complete_inline(run.id, units as i64).await?;
                    Ok(PlanOutcome::Inline { units })
                }
                Err(error) => {
                    self.progress
                        .mark_failed(run.id, &error.to_string())
                        .await?;
                    Err(error)
                }
            };
        }

        self.enqueue_chunks(job, &path, run.id, total).await?;
        self.progress
            .set_stage(run.id, sync_progress::stage::FETCHING_PHASE_ONE)
            .await?;

        Ok(PlanOutcome::Chunked {
            total_chunks: chunks,
        })
    }

    /// Execute one leased chunk job: fetch its slice and report success
    /// into the tracker. Failures propagate to the caller, which reports
    /// them only once retries are exhausted.
    pub async fn run_chunk(&self, job: &sync_job::Model) -> Result<u64, MarketError> {
        let payload = JobPayload::from_column(job.payload.as_ref());
        let path = payload
            .path
            .unwrap_or_else(|| DEFAULT_SYNC_PATH.to_string());
        let (offset, limit, chunk_index, run_id) = match (
            payload.offset,
            payload.limit,
            payload.chunk_index,
            payload.run_id,
        ) {
            (Some(offset), Some(limit), Some(chunk_index), Some(run_id)) => {
                (offset, limit, chunk_index, run_id)
            }
            _ => {
                return Err(MarketError::Validation(
                    "chunk job payload missing offset/limit/chunk_index/run_id".to_string(),
                ));
            }
        };

        let items = self
            .client
            .fetch_page(job.account_id, &path, offset, limit)
            .await?;
        let units = items.len() as u64;

        self.report_chunk(run_id, chunk_index, units, true, None)
            .await?;

        Ok(units)
    }

    /// Record a chunk completion (success or permanent failure) and drive
    /// the reconciling transition when it was the last outstanding chunk.
    pub async fn report_chunk(
        &self,
        run_id: Uuid,
        chunk_index: u32,
        units_synced: u64,
        success: bool,
        error: Option<&str>,
    ) -> Result<sync_progress::Model, MarketError> {
        let updated = self
            .progress
            .update_chunk_progress(run_id, chunk_index, units_synced as i64, success, error)
            .await?;

        if updated.stage == sync_progress::stage::RECONCILING {
            return self.progress.finalize(run_id).await;
        }

        Ok(updated)
    }

    async fn sync_inline(
        &self,
        account_id: Uuid,
        path: &str,
        total: u64,
    ) -> Result<u64, MarketError> {
        let mut synced = 0;
        for (offset, limit) in plan_chunks(total, self.config.chunk_size) {
            let items = self
                .client
                .fetch_page(account_id, path, offset, limit)
                .await?;
            synced += items.len() as u64;
        }
        Ok(synced)
    }

    async fn enqueue_chunks(
        &self,
        parent: &sync_job::Model,
        path: &str,
        run_id: Uuid,
        total: u64,
    ) -> Result<(), MarketError> {
        let now = Utc::now();
        let now_tz: sea_orm::prelude::DateTimeWithTimeZone = now.into();

        let rows: Vec<sync_job::ActiveModel> = plan_chunks(total, self.config.chunk_size)
            .into_iter()
            .enumerate()
            .map(|(index, (offset, limit))| {
                let payload = JobPayload {
                    path: Some(path.to_string()),
                    offset: Some(offset),
                    limit: Some(limit),
                    chunk_index: Some(index as u32),
                    run_id: Some(run_id),
                    action_kind: None,
                };
                sync_job::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    tenant_id: Set(parent.tenant_id),
                    account_id: Set(parent.account_id),
                    job_kind: Set(kind::CHUNK.to_string()),
                    status: Set(status::PENDING.to_string()),
                    priority: Set(parent.priority),
                    attempts: Set(0),
                    scheduled_at: Set(now_tz),
                    lease_expires_at: Set(None),
                    retry_after: Set(None),
                    started_at: Set(None),
                    finished_at: Set(None),
                    payload: Set(payload.into_column()),
                    error: Set(None::<JsonValue>),
                    created_at: Set(now_tz),
                    updated_at: Set(now_tz),
                }
            })
            .collect();

        let count = self.jobs.enqueue_many(rows).await?;
        metrics::counter!("marketsync_chunks_planned_total").increment(count as u64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_count_covers_remainder() {
        assert_eq!(total_chunks(917, 100), 10);
        assert_eq!(total_chunks(900, 100), 9);
        assert_eq!(total_chunks(1, 100), 1);
        assert_eq!(total_chunks(0, 100), 0);
        assert_eq!(total_chunks(100, 100), 1);
        assert_eq!(total_chunks(101, 100), 2);
    }

    #[test]
    fn chunk_slices_are_contiguous_and_exhaustive() {
        let slices = plan_chunks(917, 100);
        assert_eq!(slices.len(), 10);
        assert_eq!(slices[0], (0, 100));
        assert_eq!(slices[8], (800, 100));
        assert_eq!(slices[9], (900, 17));

        let covered: u64 = slices.iter().map(|(_, limit)| limit).sum();
        assert_eq!(covered, 917);

        for window in slices.windows(2) {
            let (offset_a, limit_a) = window[0];
            let (offset_b, _) = window[1];
            assert_eq!(offset_a + limit_a, offset_b);
        }
    }

    #[test]
    fn empty_dataset_plans_no_chunks() {
        assert!(plan_chunks(0, 100).is_empty());
    }

    #[test]
    fn exact_multiple_has_full_final_chunk() {
        let slices = plan_chunks(300, 100);
        assert_eq!(slices.len(), 3);
        assert_eq!(slices[2], (200, 100));
    }
}
