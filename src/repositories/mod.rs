//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for the
//! engine's entities, providing tenant-aware data access.

pub mod account;
pub mod batch_action;
pub mod run_health;
pub mod sync_job;
pub mod sync_progress;

pub use account::AccountRepository;
pub use batch_action::BatchActionRepository;
pub use run_health::RunHealthRepository;
pub use sync_job::SyncJobRepository;
pub use sync_progress::SyncProgressRepository;
