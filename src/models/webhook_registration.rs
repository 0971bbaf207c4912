//! WebhookRegistration entity model
//!
//! This module contains the SeaORM entity model for the webhook_registrations
//! table. Every inbound delivery is resolved against a row of this table by
//! its external UUID.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// A webhook endpoint configured for one code host
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "webhook_registrations")]
pub struct Model {
    /// Internal identifier (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Identifier embedded in the webhook URL handed to the code host
    #[sea_orm(unique)]
    pub external_id: Uuid,

    /// Code host kind as stored; unknown values are rejected at request time
    pub code_host_kind: String,

    /// Normalized base URL of the code host
    pub code_host_url: String,

    /// Shared secret, AES-256-GCM encrypted when a crypto key is configured
    pub secret_ciphertext: Option<Vec<u8>>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
