//! Merging normalized webhook events into a changeset's timeline.
//!
//! The changeset is resolved first. Each attempt then runs in its own
//! transaction that opens by write-locking the changeset row, inserts or
//! merges the `(changeset, kind, key)` row and recomputes the changeset's
//! derived state from the full timeline. Concurrent deliveries for the same
//! changeset queue on that lock; lost races and busy databases are retried.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use rand::Rng;
use sea_orm::{ConnectionTrait, DatabaseConnection, TransactionTrait};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::changeset_events::{ChangesetEventKind, Metadata, NormalizedEvent, derive, kind_for};
use crate::error::{WebhookError, is_transient_conflict};
use crate::models::changeset;
use crate::repositories::{ChangesetEventRepository, ChangesetRepository};
use crate::webhooks::PrIdentity;

const MAX_ATTEMPTS: u32 = 8;
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(10);
const MAX_RETRY_JITTER_MS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The event row was created (`created`) or merged into an existing row.
    Applied { changeset_id: Uuid, created: bool },
    /// The repo or changeset is not tracked; nothing was written.
    NotTracked,
}

#[derive(Debug, Clone)]
pub struct ChangesetEventUpserter {
    pub db: Arc<DatabaseConnection>,
}

impl ChangesetEventUpserter {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Apply `event` to the changeset identified by `identity`.
    pub async fn upsert(
        &self,
        code_host_url: &str,
        service_type: &str,
        identity: &PrIdentity,
        event: &NormalizedEvent,
    ) -> Result<UpsertOutcome, WebhookError> {
        let kind = kind_for(event)?;
        let Some(changeset) =
            resolve_changeset(&*self.db, code_host_url, service_type, identity).await?
        else {
            return Ok(UpsertOutcome::NotTracked);
        };

        let mut delay = INITIAL_RETRY_DELAY;
        let mut attempt = 1;
        loop {
            match self.apply(changeset.id, kind, event).await {
                Err(WebhookError::Store(err))
                    if attempt < MAX_ATTEMPTS && is_transient_conflict(&err) =>
                {
                    warn!(
                        changeset_id = %changeset.id,
                        kind = %kind,
                        attempt,
                        error = %err,
                        "Changeset event upsert conflicted, retrying"
                    );
                    counter!("changeset_event_upsert_retries_total", "kind" => kind.as_str())
                        .increment(1);
                    let jitter =
                        Duration::from_millis(rand::thread_rng().gen_range(0..=MAX_RETRY_JITTER_MS));
                    sleep(delay + jitter).await;
                    delay *= 2;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn apply(
        &self,
        changeset_id: Uuid,
        kind: ChangesetEventKind,
        event: &NormalizedEvent,
    ) -> Result<UpsertOutcome, WebhookError> {
        let txn = self.db.begin().await?;

        let Some(changeset) = ChangesetRepository::lock_for_update(&txn, changeset_id).await? else {
            txn.rollback().await?;
            debug!(%changeset_id, "Changeset deleted before event was applied");
            return Ok(UpsertOutcome::NotTracked);
        };

        let existing = ChangesetEventRepository::find(&txn, changeset_id, kind, &event.key).await?;
        let created = match existing {
            None => {
                ChangesetEventRepository::insert(&txn, changeset_id, kind, &event.key, &event.metadata)
                    .await?;
                true
            }
            Some(row) => {
                let previous = Metadata::decode(kind, row.metadata.clone())?;
                let merged = Metadata::merge(previous, event.metadata.clone())?;
                ChangesetEventRepository::update_metadata(&txn, row, &merged).await?;
                false
            }
        };

        let timeline = ChangesetEventRepository::timeline(&txn, changeset_id).await?;
        let state = derive(&timeline);
        ChangesetRepository::update_derived_state(&txn, changeset, state).await?;

        txn.commit().await?;

        counter!(
            "changeset_events_upserted_total",
            "kind" => kind.as_str(),
            "op" => if created { "insert" } else { "merge" }
        )
        .increment(1);
        debug!(
            %changeset_id,
            kind = %kind,
            key = %event.key,
            created,
            review_state = %state.review,
            check_state = %state.check,
            "Changeset event applied"
        );

        Ok(UpsertOutcome::Applied {
            changeset_id,
            created,
        })
    }

    /// Resolve a changeset without writing anything, for the resync path.
    pub async fn find_changeset(
        &self,
        code_host_url: &str,
        service_type: &str,
        identity: &PrIdentity,
    ) -> Result<Option<changeset::Model>, WebhookError> {
        resolve_changeset(&*self.db, code_host_url, service_type, identity).await
    }

    /// Identities of the tracked changesets whose head branch is in `branches`.
    pub async fn identities_on_branches(
        &self,
        code_host_url: &str,
        service_type: &str,
        repo_external_id: &str,
        branches: &[String],
    ) -> Result<Vec<PrIdentity>, WebhookError> {
        let repos =
            ChangesetRepository::find_repos(&*self.db, repo_external_id, code_host_url, service_type)
                .await?;
        let repo = match repos.as_slice() {
            [] => {
                info!(repo = repo_external_id, code_host_url, "Repo not tracked, ignoring branch event");
                return Ok(Vec::new());
            }
            [repo] => repo,
            _ => return Err(ambiguous_repo(repo_external_id, code_host_url)),
        };

        let changesets = ChangesetRepository::find_by_branches(&*self.db, repo.id, branches).await?;
        Ok(changesets
            .into_iter()
            .map(|changeset| PrIdentity::new(changeset.external_id, repo.external_id.clone()))
            .collect())
    }
}

async fn resolve_changeset<C>(
    conn: &C,
    code_host_url: &str,
    service_type: &str,
    identity: &PrIdentity,
) -> Result<Option<changeset::Model>, WebhookError>
where
    C: ConnectionTrait,
{
    let repos = ChangesetRepository::find_repos(
        conn,
        &identity.repo_external_id,
        code_host_url,
        service_type,
    )
    .await?;
    let repo = match repos.as_slice() {
        [] => {
            info!(%identity, code_host_url, "Repo not tracked, ignoring event");
            return Ok(None);
        }
        [repo] => repo,
        _ => return Err(ambiguous_repo(&identity.repo_external_id, code_host_url)),
    };

    let changeset =
        ChangesetRepository::find_changeset(conn, repo.id, &identity.id, service_type).await?;
    if changeset.is_none() {
        debug!(%identity, "Changeset not tracked, ignoring event");
    }
    Ok(changeset)
}

fn ambiguous_repo(external_id: &str, code_host_url: &str) -> WebhookError {
    WebhookError::InvariantViolation(format!(
        "more than one repo matches external id {external_id} on {code_host_url}"
    ))
}
