//! Changeset event rows keyed by `(changeset_id, kind, key)`.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use tracing::warn;
use uuid::Uuid;

use crate::changeset_events::{
    ChangesetEventKind, Metadata, TimelineEvent, parse_changeset_event_kind,
};
use crate::models::changeset_event::{self, Entity as ChangesetEvent};

pub struct ChangesetEventRepository;

impl ChangesetEventRepository {
    pub async fn find<C>(
        conn: &C,
        changeset_id: Uuid,
        kind: ChangesetEventKind,
        key: &str,
    ) -> Result<Option<changeset_event::Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        ChangesetEvent::find()
            .filter(changeset_event::Column::ChangesetId.eq(changeset_id))
            .filter(changeset_event::Column::Kind.eq(kind.as_str()))
            .filter(changeset_event::Column::Key.eq(key))
            .one(conn)
            .await
    }

    pub async fn insert<C>(
        conn: &C,
        changeset_id: Uuid,
        kind: ChangesetEventKind,
        key: &str,
        metadata: &Metadata,
    ) -> Result<changeset_event::Model, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = Utc::now().fixed_offset();
        changeset_event::ActiveModel {
            id: Set(Uuid::new_v4()),
            changeset_id: Set(changeset_id),
            kind: Set(kind.as_str().to_string()),
            key: Set(key.to_string()),
            metadata: Set(metadata.to_json()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(conn)
        .await
    }

    pub async fn update_metadata<C>(
        conn: &C,
        existing: changeset_event::Model,
        metadata: &Metadata,
    ) -> Result<changeset_event::Model, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active: changeset_event::ActiveModel = existing.into();
        active.metadata = Set(metadata.to_json());
        active.updated_at = Set(Utc::now().fixed_offset());
        active.update(conn).await
    }

    /// Load a changeset's timeline in insertion order.
    ///
    /// Rows whose kind or metadata no longer decodes are skipped with a
    /// warning rather than blocking state computation for the changeset.
    pub async fn timeline<C>(conn: &C, changeset_id: Uuid) -> Result<Vec<TimelineEvent>, DbErr>
    where
        C: ConnectionTrait,
    {
        let rows = ChangesetEvent::find()
            .filter(changeset_event::Column::ChangesetId.eq(changeset_id))
            .order_by_asc(changeset_event::Column::CreatedAt)
            .all(conn)
            .await?;

        let mut timeline = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(kind) = parse_changeset_event_kind(&row.kind) else {
                warn!(event_id = %row.id, kind = %row.kind, "skipping event with unknown kind");
                continue;
            };
            match Metadata::decode(kind, row.metadata) {
                Ok(metadata) => timeline.push(TimelineEvent {
                    kind,
                    metadata,
                    recorded_at: row.created_at.with_timezone(&Utc),
                }),
                Err(err) => {
                    warn!(event_id = %row.id, error = %err, "skipping event with undecodable metadata")
                }
            }
        }
        Ok(timeline)
    }
}
