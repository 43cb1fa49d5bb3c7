//! # Data Models
//!
//! This module contains all the data models used throughout the marketsync
//! engine.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod account;
pub mod batch_action;
pub mod run_health;
pub mod sync_job;
pub mod sync_progress;
pub mod tenant;

pub use account::Entity as Account;
pub use batch_action::Entity as BatchAction;
pub use run_health::Entity as RunHealth;
pub use sync_job::Entity as SyncJob;
pub use sync_progress::Entity as SyncProgress;
pub use tenant::Entity as Tenant;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "marketsync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
