//! Repo entity model
//!
//! Repositories are owned by the wider system; the gateway only reads them
//! to resolve a pull request's owning repository.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "repos")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub name: String,

    /// Code host specific repository id (GraphQL node id, project id, uuid...)
    pub external_id: String,

    /// Service type, e.g. github or bitbucketCloud
    pub service_type: String,

    /// Base URL of the code host the repository lives on
    pub service_id: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::changeset::Entity")]
    Changeset,
}

impl Related<super::changeset::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Changeset.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
