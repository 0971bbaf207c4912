//! Migration to create the changeset_events table.
//!
//! Each row is one entry of a changeset's timeline. The unique index on
//! (changeset_id, kind, key) is what makes webhook redelivery idempotent.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ChangesetEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ChangesetEvents::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ChangesetEvents::ChangesetId).uuid().not_null())
                    .col(ColumnDef::new(ChangesetEvents::Kind).text().not_null())
                    .col(ColumnDef::new(ChangesetEvents::Key).text().not_null())
                    .col(
                        ColumnDef::new(ChangesetEvents::Metadata)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChangesetEvents::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ChangesetEvents::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_changeset_events_changeset_id")
                            .from(ChangesetEvents::Table, ChangesetEvents::ChangesetId)
                            .to(Changesets::Table, Changesets::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_changeset_events_changeset_kind_key")
                    .table(ChangesetEvents::Table)
                    .col(ChangesetEvents::ChangesetId)
                    .col(ChangesetEvents::Kind)
                    .col(ChangesetEvents::Key)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("uq_changeset_events_changeset_kind_key")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ChangesetEvents::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ChangesetEvents {
    Table,
    Id,
    ChangesetId,
    Kind,
    Key,
    Metadata,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Changesets {
    Table,
    Id,
}
