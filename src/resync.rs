//! Escape valve for events whose payload is too thin to merge.
//!
//! Instead of writing a timeline row, the changeset is queued for a full
//! refresh from its code host by the external sync scheduler.

use async_trait::async_trait;
use metrics::counter;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::repositories::ChangesetSyncJobRepository;

#[async_trait]
pub trait ChangesetSyncer: Send + Sync {
    /// Request a resync of one changeset. `reason` names the triggering event.
    async fn enqueue(&self, changeset_id: Uuid, reason: &str) -> anyhow::Result<()>;
}

/// Syncer backed by the `changeset_sync_jobs` queue table.
#[derive(Debug, Clone)]
pub struct QueueChangesetSyncer {
    jobs: ChangesetSyncJobRepository,
}

impl QueueChangesetSyncer {
    pub fn new(db: Arc<sea_orm::DatabaseConnection>) -> Self {
        Self {
            jobs: ChangesetSyncJobRepository::new(db),
        }
    }
}

#[async_trait]
impl ChangesetSyncer for QueueChangesetSyncer {
    async fn enqueue(&self, changeset_id: Uuid, reason: &str) -> anyhow::Result<()> {
        let job = self.jobs.enqueue(changeset_id, reason).await?;
        counter!("changeset_resyncs_enqueued_total").increment(1);
        info!(%changeset_id, job_id = %job.id, reason, "Changeset resync enqueued");
        Ok(())
    }
}

/// Enqueue and swallow failures; a missed resync is picked up by the
/// scheduler's periodic full sync.
pub async fn enqueue_logged(syncer: &dyn ChangesetSyncer, changeset_id: Uuid, reason: &str) {
    if let Err(err) = syncer.enqueue(changeset_id, reason).await {
        counter!("changeset_resync_failures_total").increment(1);
        warn!(%changeset_id, reason, error = %err, "Failed to enqueue changeset resync");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::sync::Mutex;

    /// Records enqueue calls; optionally fails every call.
    #[derive(Default)]
    pub struct RecordingSyncer {
        pub calls: Mutex<Vec<(Uuid, String)>>,
        pub fail: bool,
    }

    #[async_trait]
    impl ChangesetSyncer for RecordingSyncer {
        async fn enqueue(&self, changeset_id: Uuid, reason: &str) -> anyhow::Result<()> {
            self.calls.lock().await.push((changeset_id, reason.to_string()));
            if self.fail {
                anyhow::bail!("queue unavailable");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn enqueue_failures_are_swallowed() {
        let syncer = RecordingSyncer {
            fail: true,
            ..Default::default()
        };
        enqueue_logged(&syncer, Uuid::new_v4(), "gitlab:merge_request:update").await;
        assert_eq!(syncer.calls.lock().await.len(), 1);
    }
}
