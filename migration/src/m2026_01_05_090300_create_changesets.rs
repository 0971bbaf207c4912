//! Migration to create the changesets table.
//!
//! A changeset is the tracked counterpart of a pull/merge request. The
//! review, check and external state columns are derived from its event
//! timeline and rewritten after every upsert.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Changesets::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Changesets::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Changesets::RepoId).uuid().not_null())
                    .col(ColumnDef::new(Changesets::ExternalId).text().not_null())
                    .col(ColumnDef::new(Changesets::ExternalBranch).text().null())
                    .col(
                        ColumnDef::new(Changesets::ExternalServiceType)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Changesets::ExternalState).text().null())
                    .col(
                        ColumnDef::new(Changesets::ReviewState)
                            .text()
                            .not_null()
                            .default("PENDING"),
                    )
                    .col(
                        ColumnDef::new(Changesets::CheckState)
                            .text()
                            .not_null()
                            .default("UNKNOWN"),
                    )
                    .col(
                        ColumnDef::new(Changesets::SyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Changesets::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Changesets::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_changesets_repo_id")
                            .from(Changesets::Table, Changesets::RepoId)
                            .to(Repos::Table, Repos::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_changesets_repo_external")
                    .table(Changesets::Table)
                    .col(Changesets::RepoId)
                    .col(Changesets::ExternalId)
                    .to_owned(),
            )
            .await?;

        // Secondary lookup for status events that only name a branch.
        manager
            .create_index(
                Index::create()
                    .name("idx_changesets_repo_branch")
                    .table(Changesets::Table)
                    .col(Changesets::RepoId)
                    .col(Changesets::ExternalBranch)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_changesets_repo_branch").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_changesets_repo_external").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Changesets::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Changesets {
    Table,
    Id,
    RepoId,
    ExternalId,
    ExternalBranch,
    ExternalServiceType,
    ExternalState,
    ReviewState,
    CheckState,
    SyncedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Repos {
    Table,
    Id,
}
