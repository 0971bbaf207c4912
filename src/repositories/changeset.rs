//! Changeset and repo lookups used while merging webhook events.
//!
//! Every function takes the connection explicitly so the upsert engine can run
//! them inside its transaction.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, sea_query::Expr,
};
use uuid::Uuid;

use crate::changeset_events::DerivedState;
use crate::models::changeset::{self, Entity as Changeset};
use crate::models::repo::{self, Entity as Repo};

pub struct ChangesetRepository;

impl ChangesetRepository {
    /// Repos matching a code host repository id on one code host.
    ///
    /// The `(external_id, service_id, service_type)` triple is expected to be
    /// unique; callers decide what to do when it is not.
    pub async fn find_repos<C>(
        conn: &C,
        external_id: &str,
        code_host_url: &str,
        service_type: &str,
    ) -> Result<Vec<repo::Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        Repo::find()
            .filter(repo::Column::ExternalId.eq(external_id))
            .filter(repo::Column::ServiceId.eq(code_host_url))
            .filter(repo::Column::ServiceType.eq(service_type))
            .all(conn)
            .await
    }

    pub async fn find_changeset<C>(
        conn: &C,
        repo_id: Uuid,
        external_id: &str,
        service_type: &str,
    ) -> Result<Option<changeset::Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        Changeset::find()
            .filter(changeset::Column::RepoId.eq(repo_id))
            .filter(changeset::Column::ExternalId.eq(external_id))
            .filter(changeset::Column::ExternalServiceType.eq(service_type))
            .one(conn)
            .await
    }

    /// Take the write lock on one changeset row for the rest of the
    /// transaction and return its current state.
    ///
    /// The touch must be the transaction's first statement: SQLite only waits
    /// on a busy writer when the transaction has not read anything yet, and
    /// Postgres holds the row lock from the update onwards. Returns `None`
    /// when the changeset no longer exists.
    pub async fn lock_for_update<C>(
        conn: &C,
        id: Uuid,
    ) -> Result<Option<changeset::Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        let touched = Changeset::update_many()
            .col_expr(
                changeset::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(changeset::Column::Id.eq(id))
            .exec(conn)
            .await?;
        if touched.rows_affected == 0 {
            return Ok(None);
        }
        Changeset::find_by_id(id).lock_exclusive().one(conn).await
    }

    /// Tracked changesets of a repo whose head branch is one of `branches`.
    pub async fn find_by_branches<C>(
        conn: &C,
        repo_id: Uuid,
        branches: &[String],
    ) -> Result<Vec<changeset::Model>, DbErr>
    where
        C: ConnectionTrait,
    {
        if branches.is_empty() {
            return Ok(Vec::new());
        }
        Changeset::find()
            .filter(changeset::Column::RepoId.eq(repo_id))
            .filter(changeset::Column::ExternalBranch.is_in(branches.iter().cloned()))
            .order_by_asc(changeset::Column::CreatedAt)
            .all(conn)
            .await
    }

    /// Persist recomputed state. External state is left untouched when the
    /// timeline has nothing to say about it.
    pub async fn update_derived_state<C>(
        conn: &C,
        changeset: changeset::Model,
        state: DerivedState,
    ) -> Result<changeset::Model, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active: changeset::ActiveModel = changeset.into();
        active.review_state = Set(state.review.as_str().to_string());
        active.check_state = Set(state.check.as_str().to_string());
        if let Some(external) = state.external {
            active.external_state = Set(Some(external.as_str().to_string()));
        }
        active.updated_at = Set(Utc::now().fixed_offset());
        active.update(conn).await
    }
}
