//! GitHub webhook payloads (`X-GitHub-Event`).

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{DecodeError, Normalization, PrIdentity, Targets, actor_key};
use crate::changeset_events::metadata::{
    GitHubActorTarget, GitHubCheck, GitHubComment, GitHubCommitStatus, GitHubLabel,
    GitHubRenamedTitle, GitHubReview, GitHubReviewDismissed, GitHubStateChange,
};
use crate::changeset_events::{ChangesetEventKind, Metadata, NormalizedEvent};

pub const EVENT_TYPES: &[&str] = &[
    "pull_request",
    "pull_request_review",
    "pull_request_review_comment",
    "issue_comment",
    "status",
    "check_suite",
    "check_run",
];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct User {
    pub login: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Repository {
    pub node_id: String,
    pub full_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PullRequest {
    pub number: i64,
    pub title: String,
    pub merged: bool,
    pub updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Label {
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TitleChange {
    pub from: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Changes {
    pub title: Option<TitleChange>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PullRequestPayload {
    pub action: String,
    pub number: i64,
    pub pull_request: PullRequest,
    pub repository: Repository,
    pub sender: User,
    pub label: Option<Label>,
    pub assignee: Option<User>,
    pub requested_reviewer: Option<User>,
    pub changes: Option<Changes>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Review {
    pub id: i64,
    pub user: User,
    pub state: String,
    pub body: Option<String>,
    pub commit_id: String,
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PullRequestReviewPayload {
    pub action: String,
    pub review: Review,
    pub pull_request: PullRequest,
    pub repository: Repository,
    pub sender: User,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Comment {
    pub id: i64,
    pub user: User,
    pub body: String,
    pub html_url: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PullRequestReviewCommentPayload {
    pub action: String,
    pub comment: Comment,
    pub pull_request: PullRequest,
    pub repository: Repository,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Issue {
    pub number: i64,
    /// Present only when the issue is a pull request.
    pub pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IssueCommentPayload {
    pub action: String,
    pub issue: Issue,
    pub comment: Comment,
    pub repository: Repository,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Branch {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StatusPayload {
    pub sha: String,
    pub context: String,
    pub state: String,
    pub description: Option<String>,
    pub target_url: Option<String>,
    pub branches: Vec<Branch>,
    pub repository: Repository,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PullRequestRef {
    pub number: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct App {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CheckSuite {
    pub id: i64,
    pub head_sha: String,
    pub status: String,
    pub conclusion: Option<String>,
    pub app: App,
    pub pull_requests: Vec<PullRequestRef>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CheckSuitePayload {
    pub action: String,
    pub check_suite: CheckSuite,
    pub repository: Repository,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CheckRun {
    pub id: i64,
    pub name: String,
    pub head_sha: String,
    pub status: String,
    pub conclusion: Option<String>,
    pub pull_requests: Vec<PullRequestRef>,
    pub completed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CheckRunPayload {
    pub action: String,
    pub check_run: CheckRun,
    pub repository: Repository,
}

#[derive(Debug, Clone)]
pub enum GitHubEvent {
    Ping,
    PullRequest(PullRequestPayload),
    PullRequestReview(PullRequestReviewPayload),
    PullRequestReviewComment(PullRequestReviewCommentPayload),
    IssueComment(IssueCommentPayload),
    Status(StatusPayload),
    CheckSuite(CheckSuitePayload),
    CheckRun(CheckRunPayload),
}

fn parse<T: DeserializeOwned>(event_type: &str, body: &[u8]) -> Result<T, DecodeError> {
    serde_json::from_slice(body).map_err(|source| DecodeError::json(event_type, source))
}

pub fn decode(event_type: &str, body: &[u8]) -> Result<Option<GitHubEvent>, DecodeError> {
    let event = match event_type {
        "ping" => GitHubEvent::Ping,
        "pull_request" => GitHubEvent::PullRequest(parse(event_type, body)?),
        "pull_request_review" => GitHubEvent::PullRequestReview(parse(event_type, body)?),
        "pull_request_review_comment" => {
            GitHubEvent::PullRequestReviewComment(parse(event_type, body)?)
        }
        "issue_comment" => GitHubEvent::IssueComment(parse(event_type, body)?),
        "status" => GitHubEvent::Status(parse(event_type, body)?),
        "check_suite" => GitHubEvent::CheckSuite(parse(event_type, body)?),
        "check_run" => GitHubEvent::CheckRun(parse(event_type, body)?),
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn single(identity: PrIdentity, event: NormalizedEvent) -> Normalization {
    Normalization::Upsert {
        targets: Targets::Pulls(vec![identity]),
        event,
    }
}

fn pulls_from_refs(refs: &[PullRequestRef], repository: &Repository) -> Vec<PrIdentity> {
    refs.iter()
        .map(|pr| PrIdentity::new(pr.number, repository.node_id.clone()))
        .collect()
}

pub fn normalize(event: &GitHubEvent) -> Normalization {
    match event {
        GitHubEvent::Ping => Normalization::Skip,
        GitHubEvent::PullRequest(payload) => normalize_pull_request(payload),
        GitHubEvent::PullRequestReview(payload) => {
            let identity = PrIdentity::new(
                payload.pull_request.number,
                payload.repository.node_id.clone(),
            );
            let review = &payload.review;
            let key = review.id.to_string();
            let event = match payload.action.as_str() {
                "dismissed" => NormalizedEvent::new(
                    ChangesetEventKind::GitHubReviewDismissed,
                    key,
                    Metadata::GitHubReviewDismissed(GitHubReviewDismissed {
                        actor: payload.sender.login.clone(),
                        review_id: review.id,
                        review_author: review.user.login.clone(),
                        message: review.body.clone().unwrap_or_default(),
                        created_at: payload.pull_request.updated_at,
                    }),
                ),
                "submitted" | "edited" => NormalizedEvent::new(
                    ChangesetEventKind::GitHubReviewed,
                    key,
                    Metadata::GitHubReview(GitHubReview {
                        id: review.id,
                        author: review.user.login.clone(),
                        state: review.state.to_ascii_uppercase(),
                        body: review.body.clone().unwrap_or_default(),
                        commit_id: review.commit_id.clone(),
                        submitted_at: review.submitted_at,
                        updated_at: review.submitted_at,
                    }),
                ),
                _ => return Normalization::Skip,
            };
            single(identity, event)
        }
        GitHubEvent::PullRequestReviewComment(payload) => {
            if payload.action == "deleted" {
                return Normalization::Skip;
            }
            let identity = PrIdentity::new(
                payload.pull_request.number,
                payload.repository.node_id.clone(),
            );
            single(
                identity,
                comment_event(ChangesetEventKind::GitHubReviewCommented, &payload.comment),
            )
        }
        GitHubEvent::IssueComment(payload) => {
            if payload.issue.pull_request.is_none() || payload.action == "deleted" {
                return Normalization::Skip;
            }
            let identity = PrIdentity::new(payload.issue.number, payload.repository.node_id.clone());
            single(
                identity,
                comment_event(ChangesetEventKind::GitHubCommented, &payload.comment),
            )
        }
        GitHubEvent::Status(payload) => {
            let branches: Vec<String> = payload
                .branches
                .iter()
                .map(|branch| branch.name.clone())
                .filter(|name| !name.is_empty())
                .collect();
            if branches.is_empty() {
                return Normalization::Skip;
            }
            Normalization::Upsert {
                targets: Targets::Branches {
                    repo_external_id: payload.repository.node_id.clone(),
                    branches,
                },
                event: NormalizedEvent::new(
                    ChangesetEventKind::GitHubCommitStatus,
                    format!("{}:{}", payload.sha, payload.context),
                    Metadata::GitHubCommitStatus(GitHubCommitStatus {
                        sha: payload.sha.clone(),
                        context: payload.context.clone(),
                        state: payload.state.clone(),
                        description: payload.description.clone().unwrap_or_default(),
                        target_url: payload.target_url.clone().unwrap_or_default(),
                        received_at: payload.updated_at,
                    }),
                ),
            }
        }
        GitHubEvent::CheckSuite(payload) => {
            let suite = &payload.check_suite;
            let pulls = pulls_from_refs(&suite.pull_requests, &payload.repository);
            if pulls.is_empty() {
                return Normalization::Skip;
            }
            Normalization::Upsert {
                targets: Targets::Pulls(pulls),
                event: NormalizedEvent::new(
                    ChangesetEventKind::GitHubCheckSuite,
                    suite.id.to_string(),
                    Metadata::GitHubCheck(GitHubCheck {
                        id: suite.id,
                        name: suite.app.name.clone(),
                        head_sha: suite.head_sha.clone(),
                        status: suite.status.clone(),
                        conclusion: suite.conclusion.clone().unwrap_or_default(),
                        received_at: suite.updated_at,
                    }),
                ),
            }
        }
        GitHubEvent::CheckRun(payload) => {
            let run = &payload.check_run;
            let pulls = pulls_from_refs(&run.pull_requests, &payload.repository);
            if pulls.is_empty() {
                return Normalization::Skip;
            }
            Normalization::Upsert {
                targets: Targets::Pulls(pulls),
                event: NormalizedEvent::new(
                    ChangesetEventKind::GitHubCheckRun,
                    run.id.to_string(),
                    Metadata::GitHubCheck(GitHubCheck {
                        id: run.id,
                        name: run.name.clone(),
                        head_sha: run.head_sha.clone(),
                        status: run.status.clone(),
                        conclusion: run.conclusion.clone().unwrap_or_default(),
                        received_at: run.completed_at.or(run.started_at),
                    }),
                ),
            }
        }
    }
}

fn comment_event(kind: ChangesetEventKind, comment: &Comment) -> NormalizedEvent {
    NormalizedEvent::new(
        kind,
        comment.id.to_string(),
        Metadata::GitHubComment(GitHubComment {
            id: comment.id,
            author: comment.user.login.clone(),
            body: comment.body.clone(),
            url: comment.html_url.clone(),
            created_at: comment.created_at,
            updated_at: comment.updated_at,
        }),
    )
}

fn normalize_pull_request(payload: &PullRequestPayload) -> Normalization {
    let pr = &payload.pull_request;
    let number = if pr.number != 0 { pr.number } else { payload.number };
    let identity = PrIdentity::new(number, payload.repository.node_id.clone());
    let actor = payload.sender.login.as_str();
    let at = pr.updated_at;

    let state_change = |kind: ChangesetEventKind, at: Option<DateTime<Utc>>| {
        NormalizedEvent::new(
            kind,
            actor_key(actor, at),
            Metadata::GitHubStateChange(GitHubStateChange {
                actor: actor.to_string(),
                created_at: at,
            }),
        )
    };
    let actor_target = |kind: ChangesetEventKind, target: Option<&User>| {
        let target = target.map(|user| user.login.clone()).unwrap_or_default();
        NormalizedEvent::new(
            kind,
            format!("{}:{}", actor_key(actor, at), target),
            Metadata::GitHubActorTarget(GitHubActorTarget {
                actor: actor.to_string(),
                target,
                created_at: at,
            }),
        )
    };
    let label = |kind: ChangesetEventKind| {
        let label = payload.label.clone().unwrap_or_default();
        NormalizedEvent::new(
            kind,
            format!("{}:{}", actor_key(actor, at), label.name),
            Metadata::GitHubLabel(GitHubLabel {
                actor: actor.to_string(),
                name: label.name,
                color: label.color,
                created_at: at,
            }),
        )
    };

    let event = match payload.action.as_str() {
        "closed" if pr.merged => {
            state_change(ChangesetEventKind::GitHubMerged, pr.merged_at.or(at))
        }
        "closed" => state_change(ChangesetEventKind::GitHubClosed, pr.closed_at.or(at)),
        "reopened" => state_change(ChangesetEventKind::GitHubReopened, at),
        "ready_for_review" => state_change(ChangesetEventKind::GitHubReadyForReview, at),
        "converted_to_draft" => state_change(ChangesetEventKind::GitHubConvertToDraft, at),
        "labeled" => label(ChangesetEventKind::GitHubLabeled),
        "unlabeled" => label(ChangesetEventKind::GitHubUnlabeled),
        "assigned" => actor_target(ChangesetEventKind::GitHubAssigned, payload.assignee.as_ref()),
        "unassigned" => {
            actor_target(ChangesetEventKind::GitHubUnassigned, payload.assignee.as_ref())
        }
        "review_requested" => actor_target(
            ChangesetEventKind::GitHubReviewRequested,
            payload.requested_reviewer.as_ref(),
        ),
        "review_request_removed" => actor_target(
            ChangesetEventKind::GitHubReviewRequestRemoved,
            payload.requested_reviewer.as_ref(),
        ),
        "edited" => {
            let Some(previous) = payload.changes.as_ref().and_then(|c| c.title.as_ref()) else {
                return Normalization::Skip;
            };
            NormalizedEvent::new(
                ChangesetEventKind::GitHubRenamedTitle,
                actor_key(actor, at),
                Metadata::GitHubRenamedTitle(GitHubRenamedTitle {
                    actor: actor.to_string(),
                    previous_title: previous.from.clone(),
                    current_title: pr.title.clone(),
                    created_at: at,
                }),
            )
        }
        _ => return Normalization::Skip,
    };
    single(identity, event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_json(event_type: &str, value: serde_json::Value) -> GitHubEvent {
        decode(event_type, value.to_string().as_bytes())
            .unwrap()
            .expect("event type is recognized")
    }

    #[test]
    fn unknown_event_types_are_unrecognized() {
        assert!(decode("deployment", b"{}").unwrap().is_none());
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(decode("pull_request", b"{not json").is_err());
    }

    #[test]
    fn merged_pull_request_normalizes_to_merged() {
        let event = decode_json(
            "pull_request",
            json!({
                "action": "closed",
                "number": 7,
                "pull_request": {"number": 7, "merged": true, "merged_at": "2026-01-05T10:00:00Z"},
                "repository": {"node_id": "R_1"},
                "sender": {"login": "alice"}
            }),
        );
        let Normalization::Upsert { targets, event } = normalize(&event) else {
            panic!("expected upsert");
        };
        assert_eq!(targets, Targets::Pulls(vec![PrIdentity::new(7, "R_1")]));
        assert_eq!(event.kind, ChangesetEventKind::GitHubMerged);
        assert!(event.key.starts_with("alice:"));
    }

    #[test]
    fn review_state_is_upper_cased() {
        let event = decode_json(
            "pull_request_review",
            json!({
                "action": "submitted",
                "review": {"id": 99, "user": {"login": "bob"}, "state": "approved"},
                "pull_request": {"number": 3},
                "repository": {"node_id": "R_1"}
            }),
        );
        let Normalization::Upsert { event, .. } = normalize(&event) else {
            panic!("expected upsert");
        };
        assert_eq!(event.key, "99");
        let Metadata::GitHubReview(review) = event.metadata else {
            panic!("unexpected metadata");
        };
        assert_eq!(review.state, "APPROVED");
    }

    #[test]
    fn status_targets_branches() {
        let event = decode_json(
            "status",
            json!({
                "sha": "abc123",
                "context": "ci/build",
                "state": "success",
                "branches": [{"name": "main"}],
                "repository": {"node_id": "R_1"}
            }),
        );
        let Normalization::Upsert { targets, event } = normalize(&event) else {
            panic!("expected upsert");
        };
        assert_eq!(
            targets,
            Targets::Branches {
                repo_external_id: "R_1".into(),
                branches: vec!["main".into()],
            }
        );
        assert_eq!(event.key, "abc123:ci/build");
    }

    #[test]
    fn issue_comments_outside_pull_requests_are_skipped() {
        let event = decode_json(
            "issue_comment",
            json!({
                "action": "created",
                "issue": {"number": 4},
                "comment": {"id": 1},
                "repository": {"node_id": "R_1"}
            }),
        );
        assert_eq!(normalize(&event), Normalization::Skip);
    }

    #[test]
    fn check_run_targets_every_listed_pull_request() {
        let event = decode_json(
            "check_run",
            json!({
                "action": "completed",
                "check_run": {
                    "id": 5, "name": "lint", "status": "completed", "conclusion": "success",
                    "pull_requests": [{"number": 1}, {"number": 2}]
                },
                "repository": {"node_id": "R_1"}
            }),
        );
        let Normalization::Upsert { targets, .. } = normalize(&event) else {
            panic!("expected upsert");
        };
        assert_eq!(
            targets,
            Targets::Pulls(vec![PrIdentity::new(1, "R_1"), PrIdentity::new(2, "R_1")])
        );
    }
}
