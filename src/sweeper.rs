//! Lease sweeper: reclaims jobs whose worker died mid-lease.
//!
//! Runs on a fixed interval and flips any leased job whose lease expired
//! back to pending, making it eligible for the next executor tick. The
//! attempt counter is bumped at claim time, so a job that keeps crashing
//! its worker still runs out of attempts instead of looping forever.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::repositories::SyncJobRepository;

/// Periodic reclaimer for expired job leases.
#[derive(Clone)]
pub struct LeaseSweeper {
    jobs: SyncJobRepository,
    interval: Duration,
}

impl LeaseSweeper {
    pub fn new(jobs: SyncJobRepository, interval_seconds: u64) -> Self {
        Self {
            jobs,
            interval: Duration::from_secs(interval_seconds),
        }
    }

    /// Sweep until the token is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            interval_seconds = self.interval.as_secs(),
            "Lease sweeper started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Lease sweeper shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.sweep_once().await;
                }
            }
        }
    }

    /// One sweep pass. Errors are logged, never fatal: the next tick
    /// tries again.
    pub async fn sweep_once(&self) {
        match self.jobs.sweep_expired(Utc::now()).await {
            Ok(0) => {}
            Ok(reclaimed) => {
                tracing::warn!(reclaimed, "Reclaimed expired job leases");
            }
            Err(error) => {
                tracing::error!(error = %error, "Lease sweep failed");
            }
        }
    }
}
