//! Database migrations for the marketsync engine.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2026_05_01_000001_create_tenants;
mod m2026_05_01_000100_create_accounts;
mod m2026_05_01_000200_create_sync_jobs;
mod m2026_05_01_000300_create_sync_progress;
mod m2026_05_01_000400_create_batch_actions;
mod m2026_05_01_000500_create_run_health;
mod m2026_05_01_000600_add_sync_job_lease_guard;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_05_01_000001_create_tenants::Migration),
            Box::new(m2026_05_01_000100_create_accounts::Migration),
            Box::new(m2026_05_01_000200_create_sync_jobs::Migration),
            Box::new(m2026_05_01_000300_create_sync_progress::Migration),
            Box::new(m2026_05_01_000400_create_batch_actions::Migration),
            Box::new(m2026_05_01_000500_create_run_health::Migration),
            Box::new(m2026_05_01_000600_add_sync_job_lease_guard::Migration),
        ]
    }
}
