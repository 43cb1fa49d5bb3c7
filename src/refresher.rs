//! Background credential refresher.
//!
//! Proactively refreshes tokens that will expire soon, so the common case
//! is that `get_valid` finds a fresh credential and jobs never pay the
//! refresh round-trip. On-demand refresh in the credential service remains
//! the correctness backstop; this loop is purely an optimization, and every
//! failure here is logged and retried on a later pass.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use rand::Rng;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::CredentialConfig;
use crate::credentials::CredentialService;
use crate::error::MarketError;

/// Periodic proactive refresher for expiring credentials.
#[derive(Clone)]
pub struct CredentialRefresher {
    credentials: Arc<CredentialService>,
    config: CredentialConfig,
}

impl CredentialRefresher {
    pub fn new(credentials: Arc<CredentialService>, config: CredentialConfig) -> Self {
        Self {
            credentials,
            config,
        }
    }

    /// Refresh expiring credentials until the token is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(StdDuration::from_secs(self.config.tick_seconds));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            tick_seconds = self.config.tick_seconds,
            lead_seconds = self.config.refresh_lead_seconds,
            "Credential refresher started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Credential refresher shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(error) = self.refresh_pass().await {
                        tracing::error!(error = %error, "Credential refresh pass failed");
                    }
                }
            }
        }
    }

    /// One pass: refresh every account whose token expires within the lead
    /// window, a bounded number at a time.
    pub async fn refresh_pass(&self) -> Result<usize, MarketError> {
        let lead = Duration::seconds(self.config.refresh_lead_seconds as i64);
        let expiring = self
            .credentials
            .accounts_needing_refresh(lead, 200)
            .await?;

        if expiring.is_empty() {
            return Ok(0);
        }

        tracing::info!(count = expiring.len(), "Refreshing expiring credentials");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency as usize));
        let mut handles = Vec::with_capacity(expiring.len());

        for account in expiring {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                // Semaphore is never closed while we hold it.
                Err(_) => break,
            };
            let credentials = self.credentials.clone();
            let jitter_factor = self.config.jitter_factor;

            handles.push(tokio::spawn(async move {
                let _permit = permit;

                // Small random delay so a fleet of instances does not stampede
                // the token endpoint at the same tick.
                if jitter_factor > 0.0 {
                    let millis = rand::thread_rng().gen_range(0.0..=jitter_factor * 1000.0);
                    tokio::time::sleep(StdDuration::from_millis(millis as u64)).await;
                }

                let account_id = account.id;
                let witness = match credentials.repository().decrypt(&account) {
                    Ok(witness) => witness,
                    Err(error) => {
                        tracing::error!(
                            account_id = %account_id,
                            error = %error,
                            "Cannot decrypt credential for proactive refresh"
                        );
                        return false;
                    }
                };

                match credentials.refresh(&account, &witness).await {
                    Ok(_) => {
                        tracing::debug!(account_id = %account_id, "Proactively refreshed credential");
                        true
                    }
                    Err(error) => {
                        // ReauthRequired is already persisted by the service;
                        // transient errors wait for the next pass.
                        tracing::warn!(
                            account_id = %account_id,
                            error = %error,
                            "Proactive refresh failed"
                        );
                        false
                    }
                }
            }));
        }

        let mut refreshed = 0usize;
        for handle in handles {
            if let Ok(true) = handle.await {
                refreshed += 1;
            }
        }

        metrics::counter!("marketsync_proactive_refreshes_total").increment(refreshed as u64);
        Ok(refreshed)
    }
}
