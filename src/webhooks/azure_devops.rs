//! Azure DevOps service hook payloads (`eventType` in the body).

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{DecodeError, Normalization, PrIdentity, Targets};
use crate::changeset_events::metadata::AzureDevOpsVote;
use crate::changeset_events::{ChangesetEventKind, Metadata, NormalizedEvent};

pub const EVENT_TYPES: &[&str] = &[
    "git.pullrequest.created",
    "git.pullrequest.updated",
    "git.pullrequest.merged",
    "git.pullrequest.approved",
    "git.pullrequest.approved_with_suggestions",
    "git.pullrequest.waiting_for_author",
    "git.pullrequest.rejected",
];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Identity {
    pub unique_name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Reviewer {
    pub unique_name: String,
    pub vote: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Repository {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PullRequest {
    pub pull_request_id: i64,
    pub status: String,
    pub repository: Repository,
    pub created_by: Identity,
    pub reviewers: Vec<Reviewer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PullRequestPayload {
    pub id: String,
    pub event_type: String,
    pub created_date: Option<DateTime<Utc>>,
    pub resource: PullRequest,
}

impl PullRequestPayload {
    fn identity(&self) -> PrIdentity {
        PrIdentity::new(
            self.resource.pull_request_id,
            self.resource.repository.id.clone(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullRequestAction {
    Created,
    Updated,
    Merged,
    Approved,
    ApprovedWithSuggestions,
    WaitingForAuthor,
    Rejected,
}

impl PullRequestAction {
    fn from_event_type(event_type: &str) -> Option<Self> {
        let action = match event_type.strip_prefix("git.pullrequest.")? {
            "created" => Self::Created,
            "updated" => Self::Updated,
            "merged" => Self::Merged,
            "approved" => Self::Approved,
            "approved_with_suggestions" => Self::ApprovedWithSuggestions,
            "waiting_for_author" => Self::WaitingForAuthor,
            "rejected" => Self::Rejected,
            _ => return None,
        };
        Some(action)
    }

    /// Azure DevOps vote values: 10 approve, 5 approve with suggestions,
    /// -5 wait for author, -10 reject.
    const fn vote(self) -> Option<i32> {
        match self {
            Self::Approved => Some(10),
            Self::ApprovedWithSuggestions => Some(5),
            Self::WaitingForAuthor => Some(-5),
            Self::Rejected => Some(-10),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AzureDevOpsEvent {
    pub action: PullRequestAction,
    pub payload: PullRequestPayload,
}

pub fn decode(event_type: &str, body: &[u8]) -> Result<Option<AzureDevOpsEvent>, DecodeError> {
    let Some(action) = PullRequestAction::from_event_type(event_type) else {
        return Ok(None);
    };
    let payload =
        serde_json::from_slice(body).map_err(|source| DecodeError::json(event_type, source))?;
    Ok(Some(AzureDevOpsEvent { action, payload }))
}

pub fn normalize(event: &AzureDevOpsEvent) -> Normalization {
    let payload = &event.payload;
    let kind = match event.action {
        PullRequestAction::Created => return Normalization::Skip,
        // Neither payload describes what changed precisely enough to merge.
        PullRequestAction::Updated | PullRequestAction::Merged => {
            return Normalization::Resync(payload.identity());
        }
        PullRequestAction::Approved => ChangesetEventKind::AzureDevOpsPullRequestApproved,
        PullRequestAction::ApprovedWithSuggestions => {
            ChangesetEventKind::AzureDevOpsPullRequestApprovedWithSuggestions
        }
        PullRequestAction::WaitingForAuthor => {
            ChangesetEventKind::AzureDevOpsPullRequestWaitingForAuthor
        }
        PullRequestAction::Rejected => ChangesetEventKind::AzureDevOpsPullRequestRejected,
    };

    let vote = event.action.vote().unwrap_or_default();
    let reviewer = payload
        .resource
        .reviewers
        .iter()
        .find(|reviewer| reviewer.vote == vote)
        .map(|reviewer| reviewer.unique_name.clone())
        .unwrap_or_else(|| payload.resource.created_by.unique_name.clone());

    Normalization::Upsert {
        targets: Targets::Pulls(vec![payload.identity()]),
        event: NormalizedEvent::new(
            kind,
            payload.id.clone(),
            Metadata::AzureDevOpsVote(AzureDevOpsVote {
                event_id: payload.id.clone(),
                reviewer,
                vote,
                pull_request_status: payload.resource.status.clone(),
                created_date: payload.created_date,
            }),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(event_type: &str) -> Vec<u8> {
        json!({
            "id": "evt-1",
            "eventType": event_type,
            "createdDate": "2026-01-05T09:00:00Z",
            "resource": {
                "pullRequestId": 21,
                "status": "active",
                "repository": {"id": "repo-guid"},
                "reviewers": [{"uniqueName": "erin@example.com", "vote": 10}]
            }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn approval_finds_voting_reviewer() {
        let event = decode("git.pullrequest.approved", &body("git.pullrequest.approved"))
            .unwrap()
            .unwrap();
        let Normalization::Upsert { targets, event } = normalize(&event) else {
            panic!("expected upsert");
        };
        assert_eq!(targets, Targets::Pulls(vec![PrIdentity::new(21, "repo-guid")]));
        assert_eq!(event.key, "evt-1");
        let Metadata::AzureDevOpsVote(vote) = event.metadata else {
            panic!("unexpected metadata");
        };
        assert_eq!(vote.reviewer, "erin@example.com");
        assert_eq!(vote.vote, 10);
    }

    #[test]
    fn merged_and_updated_route_to_resync() {
        for event_type in ["git.pullrequest.merged", "git.pullrequest.updated"] {
            let event = decode(event_type, &body(event_type)).unwrap().unwrap();
            assert_eq!(
                normalize(&event),
                Normalization::Resync(PrIdentity::new(21, "repo-guid"))
            );
        }
    }

    #[test]
    fn created_is_a_recognized_noop() {
        let event = decode("git.pullrequest.created", &body("git.pullrequest.created"))
            .unwrap()
            .unwrap();
        assert_eq!(normalize(&event), Normalization::Skip);
    }

    #[test]
    fn other_event_types_are_unrecognized() {
        assert!(decode("workitem.updated", b"{}").unwrap().is_none());
    }
}
