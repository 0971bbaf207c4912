//! Changeset entity model
//!
//! This module contains the SeaORM entity model for the changesets table.
//! The review, check and external state columns are derived from the
//! changeset's event timeline.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// Tracked pull/merge request
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "changesets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub repo_id: Uuid,

    /// Pull request number (or id) on the code host
    pub external_id: String,

    /// Head branch name, used to match status events that only name a branch
    pub external_branch: Option<String>,

    pub external_service_type: String,

    /// OPEN, CLOSED, MERGED or DRAFT
    pub external_state: Option<String>,

    /// PENDING, APPROVED or CHANGES_REQUESTED
    pub review_state: String,

    /// UNKNOWN, PENDING, PASSED or FAILED
    pub check_state: String,

    pub synced_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::repo::Entity",
        from = "Column::RepoId",
        to = "super::repo::Column::Id"
    )]
    Repo,
    #[sea_orm(has_many = "super::changeset_event::Entity")]
    ChangesetEvent,
}

impl Related<super::repo::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Repo.def()
    }
}

impl Related<super::changeset_event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ChangesetEvent.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
