//! ChangesetSyncJob entity model
//!
//! A queued request for a full out-of-band resync of one changeset.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "changeset_sync_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub changeset_id: Uuid,

    /// queued, running, done
    pub status: String,

    /// Event that triggered the resync, e.g. gitlab:merge_request:approved
    pub reason: String,

    pub created_at: DateTimeWithTimeZone,
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
