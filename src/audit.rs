//! Fire-and-forget audit records for terminal engine events.
//!
//! The engine appends a structured record whenever a job reaches a terminal
//! state or a batch run finishes. The default sink writes to the `audit`
//! tracing target; the trait exists so another transport can be wired in
//! without touching the executor.

use serde_json::Value as JsonValue;
use uuid::Uuid;

/// One auditable event. Everything needed to reconstruct what happened is
/// carried inline; sinks must not need database access.
#[derive(Debug, Clone)]
pub enum AuditEvent {
    JobCompleted {
        job_id: Uuid,
        account_id: Uuid,
        job_kind: String,
        attempts: i32,
    },
    JobFailed {
        job_id: Uuid,
        account_id: Uuid,
        job_kind: String,
        attempts: i32,
        error: JsonValue,
    },
    BatchRunFinished {
        account_id: Uuid,
        job_kind: String,
        submitted: usize,
        succeeded: usize,
        failed: usize,
        skipped: usize,
    },
}

/// Destination for audit events.
///
/// Recording must never block or fail job settlement; implementations log
/// and drop on error.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Default sink: structured records on the `audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        match event {
            AuditEvent::JobCompleted {
                job_id,
                account_id,
                job_kind,
                attempts,
            } => {
                tracing::info!(
                    target: "audit",
                    event = "job_completed",
                    job_id = %job_id,
                    account_id = %account_id,
                    job_kind = %job_kind,
                    attempts,
                );
            }
            AuditEvent::JobFailed {
                job_id,
                account_id,
                job_kind,
                attempts,
                error,
            } => {
                tracing::warn!(
                    target: "audit",
                    event = "job_failed",
                    job_id = %job_id,
                    account_id = %account_id,
                    job_kind = %job_kind,
                    attempts,
                    error = %error,
                );
            }
            AuditEvent::BatchRunFinished {
                account_id,
                job_kind,
                submitted,
                succeeded,
                failed,
                skipped,
            } => {
                tracing::info!(
                    target: "audit",
                    event = "batch_run_finished",
                    account_id = %account_id,
                    job_kind = %job_kind,
                    submitted,
                    succeeded,
                    failed,
                    skipped,
                );
            }
        }
    }
}
