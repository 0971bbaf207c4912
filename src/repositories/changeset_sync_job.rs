//! Queue of changesets that need a full resync from their code host.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::changeset_sync_job::{self, Entity as ChangesetSyncJob};

pub const STATUS_QUEUED: &str = "queued";

#[derive(Debug, Clone)]
pub struct ChangesetSyncJobRepository {
    pub db: Arc<DatabaseConnection>,
}

impl ChangesetSyncJobRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn enqueue(
        &self,
        changeset_id: Uuid,
        reason: &str,
    ) -> Result<changeset_sync_job::Model, DbErr> {
        changeset_sync_job::ActiveModel {
            id: Set(Uuid::new_v4()),
            changeset_id: Set(changeset_id),
            status: Set(STATUS_QUEUED.to_string()),
            reason: Set(reason.to_string()),
            created_at: Set(Utc::now().fixed_offset()),
        }
        .insert(&*self.db)
        .await
    }

    pub async fn list_for_changeset(
        &self,
        changeset_id: Uuid,
    ) -> Result<Vec<changeset_sync_job::Model>, DbErr> {
        ChangesetSyncJob::find()
            .filter(changeset_sync_job::Column::ChangesetId.eq(changeset_id))
            .all(&*self.db)
            .await
    }
}
