//! Database migrations for the webhook gateway.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2026_01_05_090000_create_code_hosts;
mod m2026_01_05_090100_create_webhook_registrations;
mod m2026_01_05_090200_create_repos;
mod m2026_01_05_090300_create_changesets;
mod m2026_01_05_090400_create_changeset_events;
mod m2026_01_05_090500_create_webhook_logs;
mod m2026_01_05_090600_create_changeset_sync_jobs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_01_05_090000_create_code_hosts::Migration),
            Box::new(m2026_01_05_090100_create_webhook_registrations::Migration),
            Box::new(m2026_01_05_090200_create_repos::Migration),
            Box::new(m2026_01_05_090300_create_changesets::Migration),
            Box::new(m2026_01_05_090400_create_changeset_events::Migration),
            Box::new(m2026_01_05_090500_create_webhook_logs::Migration),
            Box::new(m2026_01_05_090600_create_changeset_sync_jobs::Migration),
        ]
    }
}
