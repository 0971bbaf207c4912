//! Handler that feeds decoded webhook events into changeset timelines.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::router::{DispatchContext, WebhookHandler, WebhookRouter};
use super::{
    ALL_CODE_HOST_KINDS, Normalization, PrIdentity, Targets, WebhookEvent, changeset_event_types,
};
use crate::changeset_events::NormalizedEvent;
use crate::error::WebhookError;
use crate::resync::{ChangesetSyncer, enqueue_logged};
use crate::upsert::{ChangesetEventUpserter, UpsertOutcome};

pub struct ChangesetWebhookHandler {
    upserter: ChangesetEventUpserter,
    syncer: Arc<dyn ChangesetSyncer>,
}

impl ChangesetWebhookHandler {
    pub fn new(upserter: ChangesetEventUpserter, syncer: Arc<dyn ChangesetSyncer>) -> Self {
        Self { upserter, syncer }
    }

    /// Register one shared handler for every changeset event type of every
    /// supported code host.
    pub async fn register(self: Arc<Self>, router: &WebhookRouter) {
        for kind in ALL_CODE_HOST_KINDS {
            router
                .register(self.clone(), *kind, changeset_event_types(*kind))
                .await;
        }
    }

    async fn upsert_all(
        &self,
        ctx: &DispatchContext,
        identities: Vec<PrIdentity>,
        event: &NormalizedEvent,
    ) -> Result<(), WebhookError> {
        let service_type = ctx.kind.service_type();
        let mut errors = Vec::new();

        for identity in identities {
            if !identity.is_resolvable() {
                warn!(
                    code_host = %ctx.kind,
                    event_type = %ctx.event_type,
                    %identity,
                    "Dropping event for unresolvable pull request"
                );
                continue;
            }
            match self
                .upserter
                .upsert(&ctx.code_host_url, service_type, &identity, event)
                .await
            {
                Ok(UpsertOutcome::Applied { .. }) | Ok(UpsertOutcome::NotTracked) => {}
                Err(err) => {
                    warn!(%identity, kind = %event.kind, error = %err, "Changeset event upsert failed");
                    errors.push(err);
                }
            }
        }

        WebhookError::aggregate(errors).map_or(Ok(()), Err)
    }

    async fn resync(&self, ctx: &DispatchContext, identity: PrIdentity) -> Result<(), WebhookError> {
        if !identity.is_resolvable() {
            warn!(code_host = %ctx.kind, %identity, "Dropping resync for unresolvable pull request");
            return Ok(());
        }
        let changeset = self
            .upserter
            .find_changeset(&ctx.code_host_url, ctx.kind.service_type(), &identity)
            .await?;
        match changeset {
            Some(changeset) => {
                let reason = format!("{}:{}", ctx.kind.service_type(), ctx.event_type);
                enqueue_logged(self.syncer.as_ref(), changeset.id, &reason).await;
            }
            None => debug!(%identity, "Resync requested for untracked changeset"),
        }
        Ok(())
    }
}

#[async_trait]
impl WebhookHandler for ChangesetWebhookHandler {
    fn name(&self) -> &'static str {
        "changesets"
    }

    async fn handle(
        &self,
        ctx: &DispatchContext,
        event: Arc<WebhookEvent>,
    ) -> Result<(), WebhookError> {
        match event.normalize() {
            Normalization::Skip => {
                debug!(code_host = %ctx.kind, event_type = %ctx.event_type, "Event has no changeset effect");
                Ok(())
            }
            Normalization::Resync(identity) => self.resync(ctx, identity).await,
            Normalization::Upsert {
                targets: Targets::Pulls(identities),
                event,
            } => self.upsert_all(ctx, identities, &event).await,
            Normalization::Upsert {
                targets:
                    Targets::Branches {
                        repo_external_id,
                        branches,
                    },
                event,
            } => {
                let identities = self
                    .upserter
                    .identities_on_branches(
                        &ctx.code_host_url,
                        ctx.kind.service_type(),
                        &repo_external_id,
                        &branches,
                    )
                    .await?;
                debug!(
                    repo = %repo_external_id,
                    ?branches,
                    matches = identities.len(),
                    "Resolved branch event to changesets"
                );
                self.upsert_all(ctx, identities, &event).await
            }
        }
    }
}
