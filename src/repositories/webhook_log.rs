//! Webhook log repository
//!
//! Diagnostic records are append-only; the purger removes them in bulk.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::webhook_log::{self, Entity as WebhookLog};

/// Fields captured for one delivery.
#[derive(Debug, Clone)]
pub struct NewWebhookLog {
    pub webhook_registration_id: Option<Uuid>,
    pub code_host_id: Option<Uuid>,
    pub status_code: u16,
    pub request: Value,
    pub response: Value,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct WebhookLogRepository {
    pub db: Arc<DatabaseConnection>,
}

impl WebhookLogRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn insert(&self, record: NewWebhookLog) -> Result<webhook_log::Model, DbErr> {
        webhook_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            webhook_registration_id: Set(record.webhook_registration_id),
            code_host_id: Set(record.code_host_id),
            status_code: Set(i32::from(record.status_code)),
            request: Set(record.request),
            response: Set(record.response),
            received_at: Set(record.received_at.fixed_offset()),
        }
        .insert(&*self.db)
        .await
    }

    /// Newest records first, optionally restricted to one registration.
    pub async fn list(
        &self,
        registration_id: Option<Uuid>,
        limit: u64,
    ) -> Result<Vec<webhook_log::Model>, DbErr> {
        let mut query = WebhookLog::find();
        if let Some(registration_id) = registration_id {
            query = query.filter(webhook_log::Column::WebhookRegistrationId.eq(registration_id));
        }
        query
            .order_by_desc(webhook_log::Column::ReceivedAt)
            .limit(limit)
            .all(&*self.db)
            .await
    }

    /// Delete every record received strictly before `cutoff`.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, DbErr> {
        let result = WebhookLog::delete_many()
            .filter(webhook_log::Column::ReceivedAt.lt(cutoff.fixed_offset()))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
