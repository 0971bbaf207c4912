//! Migration to create the code_hosts table.
//!
//! One row per code host instance (kind + base URL). Diagnostic log records
//! reference it so captured deliveries can be grouped per host.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CodeHosts::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(CodeHosts::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(CodeHosts::Kind).text().not_null())
                    .col(ColumnDef::new(CodeHosts::Url).text().not_null())
                    .col(
                        ColumnDef::new(CodeHosts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_code_hosts_kind_url")
                    .table(CodeHosts::Table)
                    .col(CodeHosts::Kind)
                    .col(CodeHosts::Url)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("uq_code_hosts_kind_url").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(CodeHosts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CodeHosts {
    Table,
    Id,
    Kind,
    Url,
    CreatedAt,
}
