//! Bounded batch action processor.
//!
//! Executes idempotent marketplace actions (review replies, campaign
//! upserts) in bounded batches. Each run fetches at most `batch_size`
//! candidates, filters out targets already recorded for the logical day,
//! picks one payload uniformly at random from each candidate's admissible
//! set, and submits everything as a single batch call. Per-item outcomes
//! are matched by target id, never by position. Three consecutive failed
//! runs open the circuit breaker for the (account, kind) pair until an
//! operator resets it.

use chrono::Utc;
use rand::seq::SliceRandom;
use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

use crate::config::BatchConfig;
use crate::error::MarketError;
use crate::marketplace::ApiClient;
use crate::models::sync_job::{self, JobPayload};
use crate::repositories::run_health::RunOutcome;
use crate::repositories::{BatchActionRepository, RunHealthRepository};

/// Default action kind when a job carries none.
pub const DEFAULT_ACTION_KIND: &str = "review_reply";

/// What one batch run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchRunReport {
    /// The circuit breaker is open; nothing was submitted.
    CircuitOpen,
    /// The run executed (possibly with zero candidates).
    Ran {
        submitted: usize,
        succeeded: usize,
        failed: usize,
        skipped: usize,
    },
}

/// One candidate target as listed by the platform.
#[derive(Debug, Clone)]
struct Candidate {
    target_id: String,
    payloads: Vec<JsonValue>,
}

fn parse_candidates(items: &[JsonValue]) -> Vec<Candidate> {
    items
        .iter()
        .filter_map(|item| {
            let target_id = item.get("id").and_then(JsonValue::as_str)?.to_string();
            let payloads = item
                .get("candidates")
                .and_then(JsonValue::as_array)
                .cloned()
                .unwrap_or_default();
            Some(Candidate {
                target_id,
                payloads,
            })
        })
        .collect()
}

/// Processor for one kind of idempotent batch action.
#[derive(Clone)]
pub struct BatchActionProcessor {
    client: ApiClient,
    records: BatchActionRepository,
    health: RunHealthRepository,
    config: BatchConfig,
}

impl BatchActionProcessor {
    pub fn new(
        client: ApiClient,
        records: BatchActionRepository,
        health: RunHealthRepository,
        config: BatchConfig,
    ) -> Self {
        Self {
            client,
            records,
            health,
            config,
        }
    }

    /// Execute one batch run for a leased batch-action job.
    ///
    /// The run itself never fails on per-item errors; those land in the
    /// audit records and the run outcome counts. Only a run-level failure
    /// (candidate listing or the batch call erroring) returns `Err`, after
    /// being recorded against the circuit breaker.
    pub async fn run(&self, job: &sync_job::Model) -> Result<BatchRunReport, MarketError> {
        let payload = JobPayload::from_column(job.payload.as_ref());
        let action_kind = payload
            .action_kind
            .unwrap_or_else(|| DEFAULT_ACTION_KIND.to_string());

        if self
            .health
            .is_circuit_open(job.account_id, &job.job_kind, self.config.cb_threshold)
            .await?
        {
            tracing::warn!(
                account_id = %job.account_id,
                action_kind = %action_kind,
                "Circuit breaker open, skipping batch run"
            );
            metrics::counter!("marketsync_batch_runs_circuit_skipped_total").increment(1);
            return Ok(BatchRunReport::CircuitOpen);
        }

        self.health
            .set_running(job.tenant_id, job.account_id, &job.job_kind, true)
            .await?;

        let result = self.execute_run(job, &action_kind).await;

        match result {
            Ok(report) => {
                if let BatchRunReport::Ran {
                    succeeded,
                    failed,
                    skipped,
                    ..
                } = report
                {
                    self.health
                        .record_run(
                            job.tenant_id,
                            job.account_id,
                            &job.job_kind,
                            &RunOutcome {
                                success_count: succeeded as i32,
                                failure_count: failed as i32,
                                skip_count: skipped as i32,
                                run_error: None,
                            },
                        )
                        .await?;
                }
                Ok(report)
            }
            Err(error) => {
                self.health
                    .record_run(
                        job.tenant_id,
                        job.account_id,
                        &job.job_kind,
                        &RunOutcome {
                            success_count: 0,
                            failure_count: 0,
                            skip_count: 0,
                            run_error: Some(error.to_string()),
                        },
                    )
                    .await?;
                Err(error)
            }
        }
    }

    async fn execute_run(
        &self,
        job: &sync_job::Model,
        action_kind: &str,
    ) -> Result<BatchRunReport, MarketError> {
        let batch_size = self.config.batch_size.min(100);
        let action_date = Utc::now().date_naive();

        let candidates_path = format!("/actions/{}/candidates", action_kind);
        let submit_path = format!("/actions/{}/batch", action_kind);

        let listed = self
            .client
            .fetch_page(job.account_id, &candidates_path, 0, batch_size as u64)
            .await?;
        let candidates = parse_candidates(&listed);

        let already_recorded: std::collections::HashSet<String> = self
            .records
            .recorded_targets(job.account_id, action_kind, action_date)
            .await?
            .into_iter()
            .collect();

        let mut skipped = 0usize;
        let mut selected: Vec<(String, Option<JsonValue>)> = Vec::new();
        let mut skip_only: Vec<String> = Vec::new();

        {
            let mut rng = rand::thread_rng();
            for candidate in candidates {
                if already_recorded.contains(&candidate.target_id) {
                    tracing::debug!(
                        target_id = %candidate.target_id,
                        "Target already actioned today, skipping"
                    );
                    skipped += 1;
                    continue;
                }
                if selected.len() + skip_only.len() >= batch_size as usize {
                    break;
                }
                match candidate.payloads.choose(&mut rng) {
                    Some(payload) => {
                        selected.push((candidate.target_id, Some(payload.clone())));
                    }
                    None => skip_only.push(candidate.target_id),
                }
            }
        }

        // Targets with no admissible payload still get an audit row.
        let skip_targets: Vec<(String, Option<JsonValue>)> =
            skip_only.into_iter().map(|id| (id, None)).collect();
        for record in self
            .records
            .create_pending(
                job.tenant_id,
                job.account_id,
                action_kind,
                action_date,
                &skip_targets,
            )
            .await?
        {
            self.records
                .mark_skipped(record.id, "no candidate payload available")
                .await?;
            skipped += 1;
        }

        if selected.is_empty() {
            tracing::info!(
                account_id = %job.account_id,
                action_kind,
                skipped,
                "No actionable candidates this run"
            );
            return Ok(BatchRunReport::Ran {
                submitted: 0,
                succeeded: 0,
                failed: 0,
                skipped,
            });
        }

        let pending = self
            .records
            .create_pending(
                job.tenant_id,
                job.account_id,
                action_kind,
                action_date,
                &selected,
            )
            .await?;

        let items: Vec<JsonValue> = pending
            .iter()
            .map(|record| {
                json!({
                    "id": record.target_id,
                    "payload": record.payload,
                })
            })
            .collect();

        let results = match self
            .client
            .submit_batch(job.account_id, &submit_path, &items)
            .await
        {
            Ok(results) => results,
            Err(error) => {
                // Batch-level failure: every submitted record fails.
                let message = error.to_string();
                for record in &pending {
                    self.records.mark_failed(record.id, &message).await?;
                }
                return Err(error);
            }
        };

        let by_target: std::collections::HashMap<&str, &JsonValue> = results
            .iter()
            .filter_map(|result| {
                result
                    .get("id")
                    .and_then(JsonValue::as_str)
                    .map(|id| (id, result))
            })
            .collect();

        let mut succeeded = 0usize;
        let mut failed = 0usize;
        for record in &pending {
            match by_target.get(record.target_id.as_str()) {
                Some(result) if result.get("success").and_then(JsonValue::as_bool) == Some(true) => {
                    self.records.mark_success(record.id).await?;
                    succeeded += 1;
                }
                Some(result) => {
                    let detail = result
                        .get("error")
                        .and_then(JsonValue::as_str)
                        .unwrap_or("platform reported failure");
                    self.records.mark_failed(record.id, detail).await?;
                    failed += 1;
                }
                None => {
                    self.records
                        .mark_failed(record.id, "no result returned for target")
                        .await?;
                    failed += 1;
                }
            }
        }

        metrics::counter!("marketsync_batch_items_succeeded_total").increment(succeeded as u64);
        metrics::counter!("marketsync_batch_items_failed_total").increment(failed as u64);

        tracing::info!(
            account_id = %job.account_id,
            action_kind,
            submitted = pending.len(),
            succeeded,
            failed,
            skipped,
            "Batch run finished"
        );

        Ok(BatchRunReport::Ran {
            submitted: pending.len(),
            succeeded,
            failed,
            skipped,
        })
    }
}
