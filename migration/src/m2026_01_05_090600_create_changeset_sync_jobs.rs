//! Migration to create the changeset_sync_jobs table.
//!
//! Queue consumed by the out-of-band syncer when a webhook payload is too
//! thin to merge directly.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ChangesetSyncJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ChangesetSyncJobs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ChangesetSyncJobs::ChangesetId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChangesetSyncJobs::Status)
                            .text()
                            .not_null()
                            .default("queued"),
                    )
                    .col(ColumnDef::new(ChangesetSyncJobs::Reason).text().not_null())
                    .col(
                        ColumnDef::new(ChangesetSyncJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_changeset_sync_jobs_changeset_id")
                            .from(ChangesetSyncJobs::Table, ChangesetSyncJobs::ChangesetId)
                            .to(Changesets::Table, Changesets::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_changeset_sync_jobs_status_created")
                    .table(ChangesetSyncJobs::Table)
                    .col(ChangesetSyncJobs::Status)
                    .col(ChangesetSyncJobs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_changeset_sync_jobs_status_created")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ChangesetSyncJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ChangesetSyncJobs {
    Table,
    Id,
    ChangesetId,
    Status,
    Reason,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Changesets {
    Table,
    Id,
}
