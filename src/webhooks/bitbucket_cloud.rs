//! Bitbucket Cloud webhook payloads (`X-Event-Key`).

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{DecodeError, Normalization, PrIdentity, Targets, actor_key};
use crate::changeset_events::metadata::{
    BitbucketCloudComment, BitbucketCloudCommitStatus, BitbucketCloudParticipant,
    BitbucketCloudPullRequest,
};
use crate::changeset_events::{ChangesetEventKind, Metadata, NormalizedEvent};

pub const EVENT_TYPES: &[&str] = &[
    "pullrequest:approved",
    "pullrequest:unapproved",
    "pullrequest:changes_request_created",
    "pullrequest:changes_request_removed",
    "pullrequest:comment_created",
    "pullrequest:comment_updated",
    "pullrequest:comment_deleted",
    "pullrequest:fulfilled",
    "pullrequest:rejected",
    "pullrequest:updated",
    "repo:commit_status_created",
    "repo:commit_status_updated",
];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Account {
    pub uuid: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Repository {
    pub uuid: String,
    pub full_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PullRequest {
    pub id: i64,
    pub title: String,
    pub state: String,
    pub updated_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Participation {
    pub date: Option<DateTime<Utc>>,
    pub user: Account,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Content {
    pub raw: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Comment {
    pub id: i64,
    pub content: Content,
    pub user: Account,
    pub deleted: bool,
    pub created_on: Option<DateTime<Utc>>,
    pub updated_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PullRequestPayload {
    pub actor: Account,
    pub pullrequest: PullRequest,
    pub repository: Repository,
    pub approval: Option<Participation>,
    pub changes_request: Option<Participation>,
    pub comment: Option<Comment>,
}

impl PullRequestPayload {
    fn identity(&self) -> PrIdentity {
        PrIdentity::new(self.pullrequest.id, self.repository.uuid.clone())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Commit {
    pub hash: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommitStatus {
    pub key: String,
    pub name: String,
    pub state: String,
    pub url: String,
    pub refname: Option<String>,
    pub commit: Commit,
    pub updated_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommitStatusPayload {
    pub commit_status: CommitStatus,
    pub repository: Repository,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullRequestAction {
    Approved,
    Unapproved,
    ChangesRequestCreated,
    ChangesRequestRemoved,
    CommentCreated,
    CommentUpdated,
    CommentDeleted,
    Fulfilled,
    Rejected,
    Updated,
}

impl PullRequestAction {
    fn from_event_key(key: &str) -> Option<Self> {
        let action = match key.strip_prefix("pullrequest:")? {
            "approved" => Self::Approved,
            "unapproved" => Self::Unapproved,
            "changes_request_created" => Self::ChangesRequestCreated,
            "changes_request_removed" => Self::ChangesRequestRemoved,
            "comment_created" => Self::CommentCreated,
            "comment_updated" => Self::CommentUpdated,
            "comment_deleted" => Self::CommentDeleted,
            "fulfilled" => Self::Fulfilled,
            "rejected" => Self::Rejected,
            "updated" => Self::Updated,
            _ => return None,
        };
        Some(action)
    }

    const fn kind(self) -> ChangesetEventKind {
        use ChangesetEventKind::*;
        match self {
            Self::Approved => BitbucketCloudPullRequestApproved,
            Self::Unapproved => BitbucketCloudPullRequestUnapproved,
            Self::ChangesRequestCreated => BitbucketCloudPullRequestChangesRequestCreated,
            Self::ChangesRequestRemoved => BitbucketCloudPullRequestChangesRequestRemoved,
            Self::CommentCreated => BitbucketCloudPullRequestCommentCreated,
            Self::CommentUpdated => BitbucketCloudPullRequestCommentUpdated,
            Self::CommentDeleted => BitbucketCloudPullRequestCommentDeleted,
            Self::Fulfilled => BitbucketCloudPullRequestFulfilled,
            Self::Rejected => BitbucketCloudPullRequestRejected,
            Self::Updated => BitbucketCloudPullRequestUpdated,
        }
    }
}

#[derive(Debug, Clone)]
pub enum BitbucketCloudEvent {
    PullRequest {
        action: PullRequestAction,
        payload: PullRequestPayload,
    },
    CommitStatus {
        created: bool,
        payload: CommitStatusPayload,
    },
}

pub fn decode(event_type: &str, body: &[u8]) -> Result<Option<BitbucketCloudEvent>, DecodeError> {
    let json = |source| DecodeError::json(event_type, source);
    let created = match event_type {
        "repo:commit_status_created" => Some(true),
        "repo:commit_status_updated" => Some(false),
        _ => None,
    };
    if let Some(created) = created {
        let payload = serde_json::from_slice(body).map_err(json)?;
        return Ok(Some(BitbucketCloudEvent::CommitStatus { created, payload }));
    }
    let Some(action) = PullRequestAction::from_event_key(event_type) else {
        return Ok(None);
    };
    let payload = serde_json::from_slice(body).map_err(json)?;
    Ok(Some(BitbucketCloudEvent::PullRequest { action, payload }))
}

pub fn normalize(event: &BitbucketCloudEvent) -> Normalization {
    match event {
        BitbucketCloudEvent::PullRequest { action, payload } => {
            let metadata_and_key = match action {
                PullRequestAction::Approved
                | PullRequestAction::Unapproved
                | PullRequestAction::ChangesRequestCreated
                | PullRequestAction::ChangesRequestRemoved => {
                    let participation = match action {
                        PullRequestAction::Approved | PullRequestAction::Unapproved => {
                            payload.approval.clone()
                        }
                        _ => payload.changes_request.clone(),
                    };
                    let Participation { date, user } = participation.unwrap_or(Participation {
                        date: None,
                        user: payload.actor.clone(),
                    });
                    let approved = *action == PullRequestAction::Approved;
                    (
                        actor_key(&user.uuid, date),
                        Metadata::BitbucketCloudParticipant(BitbucketCloudParticipant {
                            user: user.uuid,
                            role: "REVIEWER".to_string(),
                            approved,
                            state: action_state(*action).to_string(),
                            participated_on: date,
                        }),
                    )
                }
                PullRequestAction::CommentCreated
                | PullRequestAction::CommentUpdated
                | PullRequestAction::CommentDeleted => {
                    let Some(comment) = &payload.comment else {
                        return Normalization::Skip;
                    };
                    (
                        comment.id.to_string(),
                        Metadata::BitbucketCloudComment(BitbucketCloudComment {
                            id: comment.id,
                            author: comment.user.uuid.clone(),
                            body: comment.content.raw.clone(),
                            deleted: comment.deleted
                                || *action == PullRequestAction::CommentDeleted,
                            created_on: comment.created_on,
                            updated_on: comment.updated_on,
                        }),
                    )
                }
                PullRequestAction::Fulfilled
                | PullRequestAction::Rejected
                | PullRequestAction::Updated => {
                    let pr = &payload.pullrequest;
                    (
                        actor_key(&payload.actor.uuid, pr.updated_on),
                        Metadata::BitbucketCloudPullRequest(BitbucketCloudPullRequest {
                            id: pr.id,
                            title: pr.title.clone(),
                            state: pr.state.clone(),
                            actor: payload.actor.uuid.clone(),
                            updated_on: pr.updated_on,
                        }),
                    )
                }
            };
            let (key, metadata) = metadata_and_key;
            Normalization::Upsert {
                targets: Targets::Pulls(vec![payload.identity()]),
                event: NormalizedEvent::new(action.kind(), key, metadata),
            }
        }
        BitbucketCloudEvent::CommitStatus { created, payload } => {
            let status = &payload.commit_status;
            let Some(refname) = status.refname.clone().filter(|name| !name.is_empty()) else {
                return Normalization::Skip;
            };
            let kind = if *created {
                ChangesetEventKind::BitbucketCloudRepoCommitStatusCreated
            } else {
                ChangesetEventKind::BitbucketCloudRepoCommitStatusUpdated
            };
            Normalization::Upsert {
                targets: Targets::Branches {
                    repo_external_id: payload.repository.uuid.clone(),
                    branches: vec![refname.clone()],
                },
                event: NormalizedEvent::new(
                    kind,
                    format!("{}:{}", status.commit.hash, status.key),
                    Metadata::BitbucketCloudCommitStatus(BitbucketCloudCommitStatus {
                        key: status.key.clone(),
                        name: status.name.clone(),
                        state: status.state.clone(),
                        url: status.url.clone(),
                        refname,
                        commit: status.commit.hash.clone(),
                        updated_on: status.updated_on,
                    }),
                ),
            }
        }
    }
}

const fn action_state(action: PullRequestAction) -> &'static str {
    match action {
        PullRequestAction::Approved => "approved",
        PullRequestAction::ChangesRequestCreated => "changes_requested",
        _ => "",
    }
}
