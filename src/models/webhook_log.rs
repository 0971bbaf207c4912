//! WebhookLog entity model
//!
//! Diagnostic capture of an inbound delivery. Append only; removed in bulk by
//! the retention purger.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "webhook_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Registration the delivery was attributed to, if it got that far
    pub webhook_registration_id: Option<Uuid>,

    /// Resolved code host, if any
    pub code_host_id: Option<Uuid>,

    pub status_code: i32,

    /// Method, URL, headers and body of the request
    #[sea_orm(column_type = "JsonBinary")]
    pub request: JsonValue,

    /// Status, headers and body of the response
    #[sea_orm(column_type = "JsonBinary")]
    pub response: JsonValue,

    pub received_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
