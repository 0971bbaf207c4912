//! ChangesetEvent entity model
//!
//! One row per (changeset_id, kind, key). Metadata is stored as JSON and
//! decoded into a typed value by [`crate::changeset_events::Metadata::decode`].

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "changeset_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub changeset_id: Uuid,

    /// Event kind, e.g. github:reviewed
    pub kind: String,

    /// Deduplication key, stable within (changeset, kind)
    pub key: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: JsonValue,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::changeset::Entity",
        from = "Column::ChangesetId",
        to = "super::changeset::Column::Id"
    )]
    Changeset,
}

impl Related<super::changeset::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Changeset.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
