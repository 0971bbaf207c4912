//! Migration to create the webhook_logs table.
//!
//! Diagnostic snapshots of inbound deliveries. Rows are only ever inserted
//! and bulk deleted by the retention purger, so the only index needed is on
//! received_at (plus the per-registration listing).

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WebhookLogs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(WebhookLogs::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(WebhookLogs::WebhookRegistrationId)
                            .uuid()
                            .null(),
                    )
                    .col(ColumnDef::new(WebhookLogs::CodeHostId).uuid().null())
                    .col(ColumnDef::new(WebhookLogs::StatusCode).integer().not_null())
                    .col(ColumnDef::new(WebhookLogs::Request).json_binary().not_null())
                    .col(ColumnDef::new(WebhookLogs::Response).json_binary().not_null())
                    .col(
                        ColumnDef::new(WebhookLogs::ReceivedAt)
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
                    .name("idx_webhook_logs_received_at")
                    .table(WebhookLogs::Table)
                    .col(WebhookLogs::ReceivedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_webhook_logs_registration_received")
                    .table(WebhookLogs::Table)
                    .col(WebhookLogs::WebhookRegistrationId)
                    .col(WebhookLogs::ReceivedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_webhook_logs_registration_received")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("idx_webhook_logs_received_at").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(WebhookLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WebhookLogs {
    Table,
    Id,
    WebhookRegistrationId,
    CodeHostId,
    StatusCode,
    Request,
    Response,
    ReceivedAt,
}
