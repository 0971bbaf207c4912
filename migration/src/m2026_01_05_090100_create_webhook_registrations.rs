//! Migration to create the webhook_registrations table.
//!
//! A registration binds an externally visible UUID (the path segment code
//! hosts post to) to a code host and an optional shared secret.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WebhookRegistrations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WebhookRegistrations::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WebhookRegistrations::ExternalId)
                            .uuid()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(WebhookRegistrations::CodeHostKind)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookRegistrations::CodeHostUrl)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookRegistrations::SecretCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WebhookRegistrations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WebhookRegistrations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Bitbucket Cloud and the legacy GitHub endpoint scan every
        // registration of a kind.
        manager
            .create_index(
                Index::create()
                    .name("idx_webhook_registrations_kind_url")
                    .table(WebhookRegistrations::Table)
                    .col(WebhookRegistrations::CodeHostKind)
                    .col(WebhookRegistrations::CodeHostUrl)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_webhook_registrations_kind_url")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(WebhookRegistrations::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WebhookRegistrations {
    Table,
    Id,
    ExternalId,
    CodeHostKind,
    CodeHostUrl,
    SecretCiphertext,
    CreatedAt,
    UpdatedAt,
}
