//! Bitbucket Server webhook payloads (`X-Event-Key`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::{DecodeError, Normalization, PrIdentity, Targets, actor_key};
use crate::changeset_events::metadata::{BitbucketServerActivity, BitbucketServerCommitStatus};
use crate::changeset_events::{ChangesetEventKind, Metadata, NormalizedEvent};
use crate::webhook_verification::BITBUCKET_SERVER_PING;

pub const EVENT_TYPES: &[&str] = &[
    "pr:opened",
    "pr:modified",
    "pr:from_ref_updated",
    "pr:reviewer:approved",
    "pr:reviewer:unapproved",
    "pr:reviewer:needs_work",
    "pr:merged",
    "pr:declined",
    "pr:reopened",
    "pr:comment:added",
    "repo:build_status",
];

/// Dates arrive as `2026-01-05T09:00:00+0100` strings or epoch milliseconds.
fn timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(millis)) => Ok(millis
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)),
        Some(Value::String(raw)) if !raw.is_empty() => DateTime::parse_from_rfc3339(&raw)
            .or_else(|_| DateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%z"))
            .map(|parsed| Some(parsed.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct User {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Repository {
    pub id: i64,
    pub slug: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Ref {
    pub display_id: String,
    pub latest_commit: String,
    pub repository: Repository,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PullRequest {
    pub id: i64,
    pub state: String,
    pub from_ref: Ref,
    pub to_ref: Ref,
}

impl PullRequest {
    fn identity(&self) -> PrIdentity {
        PrIdentity::new(self.id, self.to_ref.repository.id.to_string())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Comment {
    pub id: i64,
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PullRequestPayload {
    #[serde(deserialize_with = "timestamp")]
    pub date: Option<DateTime<Utc>>,
    pub actor: User,
    pub pull_request: PullRequest,
    pub comment: Option<Comment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildStatus {
    pub key: String,
    pub name: String,
    pub state: String,
    pub url: String,
    #[serde(deserialize_with = "timestamp")]
    pub date_added: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildStatusPayload {
    pub commit: String,
    pub status: BuildStatus,
    pub pull_requests: Vec<PullRequest>,
}

/// Pull request webhook subtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullRequestAction {
    Opened,
    Modified,
    FromRefUpdated,
    Approved,
    Unapproved,
    NeedsWork,
    Merged,
    Declined,
    Reopened,
    CommentAdded,
}

impl PullRequestAction {
    fn from_event_key(key: &str) -> Option<Self> {
        let action = match key {
            "pr:opened" => Self::Opened,
            "pr:modified" => Self::Modified,
            "pr:from_ref_updated" => Self::FromRefUpdated,
            "pr:reviewer:approved" => Self::Approved,
            "pr:reviewer:unapproved" => Self::Unapproved,
            "pr:reviewer:needs_work" => Self::NeedsWork,
            "pr:merged" => Self::Merged,
            "pr:declined" => Self::Declined,
            "pr:reopened" => Self::Reopened,
            "pr:comment:added" => Self::CommentAdded,
            _ => return None,
        };
        Some(action)
    }

    const fn kind(self) -> ChangesetEventKind {
        match self {
            Self::Opened => ChangesetEventKind::BitbucketServerOpened,
            Self::Modified => ChangesetEventKind::BitbucketServerUpdated,
            Self::FromRefUpdated => ChangesetEventKind::BitbucketServerRescoped,
            Self::Approved => ChangesetEventKind::BitbucketServerApproved,
            Self::Unapproved => ChangesetEventKind::BitbucketServerUnapproved,
            Self::NeedsWork => ChangesetEventKind::BitbucketServerReviewed,
            Self::Merged => ChangesetEventKind::BitbucketServerMerged,
            Self::Declined => ChangesetEventKind::BitbucketServerDeclined,
            Self::Reopened => ChangesetEventKind::BitbucketServerReopened,
            Self::CommentAdded => ChangesetEventKind::BitbucketServerCommented,
        }
    }

    const fn activity(self) -> &'static str {
        match self {
            Self::Opened => "OPENED",
            Self::Modified => "UPDATED",
            Self::FromRefUpdated => "RESCOPED",
            Self::Approved => "APPROVED",
            Self::Unapproved => "UNAPPROVED",
            Self::NeedsWork => "REVIEWED",
            Self::Merged => "MERGED",
            Self::Declined => "DECLINED",
            Self::Reopened => "REOPENED",
            Self::CommentAdded => "COMMENTED",
        }
    }
}

#[derive(Debug, Clone)]
pub enum BitbucketServerEvent {
    Ping,
    PullRequest {
        action: PullRequestAction,
        payload: PullRequestPayload,
    },
    BuildStatus(BuildStatusPayload),
}

pub fn decode(event_type: &str, body: &[u8]) -> Result<Option<BitbucketServerEvent>, DecodeError> {
    let json = |source| DecodeError::json(event_type, source);
    if event_type == BITBUCKET_SERVER_PING {
        return Ok(Some(BitbucketServerEvent::Ping));
    }
    if event_type == "repo:build_status" {
        let payload = serde_json::from_slice(body).map_err(json)?;
        return Ok(Some(BitbucketServerEvent::BuildStatus(payload)));
    }
    let Some(action) = PullRequestAction::from_event_key(event_type) else {
        return Ok(None);
    };
    let payload = serde_json::from_slice(body).map_err(json)?;
    Ok(Some(BitbucketServerEvent::PullRequest { action, payload }))
}

pub fn normalize(event: &BitbucketServerEvent) -> Normalization {
    match event {
        BitbucketServerEvent::Ping => Normalization::Skip,
        BitbucketServerEvent::PullRequest { action, payload } => {
            let actor = payload.actor.name.clone();
            let comment = payload.comment.clone().unwrap_or_default();
            let key = match action {
                PullRequestAction::CommentAdded if comment.id != 0 => comment.id.to_string(),
                _ => actor_key(&actor, payload.date),
            };
            Normalization::Upsert {
                targets: Targets::Pulls(vec![payload.pull_request.identity()]),
                event: NormalizedEvent::new(
                    action.kind(),
                    key,
                    Metadata::BitbucketServerActivity(BitbucketServerActivity {
                        actor,
                        action: action.activity().to_string(),
                        comment_id: comment.id,
                        comment_text: comment.text,
                        created_at: payload.date,
                    }),
                ),
            }
        }
        BitbucketServerEvent::BuildStatus(payload) => {
            let pulls: Vec<PrIdentity> = payload
                .pull_requests
                .iter()
                .map(PullRequest::identity)
                .collect();
            if pulls.is_empty() {
                return Normalization::Skip;
            }
            let status = &payload.status;
            Normalization::Upsert {
                targets: Targets::Pulls(pulls),
                event: NormalizedEvent::new(
                    ChangesetEventKind::BitbucketServerCommitStatus,
                    format!("{}:{}", payload.commit, status.key),
                    Metadata::BitbucketServerCommitStatus(BitbucketServerCommitStatus {
                        commit: payload.commit.clone(),
                        key: status.key.clone(),
                        name: status.name.clone(),
                        state: status.state.clone(),
                        url: status.url.clone(),
                        date_added: status.date_added,
                    }),
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pr_body() -> serde_json::Value {
        json!({
            "eventKey": "pr:reviewer:approved",
            "date": "2026-01-05T09:00:00+0100",
            "actor": {"name": "dave"},
            "pullRequest": {
                "id": 11,
                "fromRef": {"displayId": "feature"},
                "toRef": {"repository": {"id": 3}}
            }
        })
    }

    #[test]
    fn approval_normalizes_with_actor_key() {
        let event = decode("pr:reviewer:approved", pr_body().to_string().as_bytes())
            .unwrap()
            .unwrap();
        let Normalization::Upsert { targets, event } = normalize(&event) else {
            panic!("expected upsert");
        };
        assert_eq!(targets, Targets::Pulls(vec![PrIdentity::new(11, "3")]));
        assert_eq!(event.kind, ChangesetEventKind::BitbucketServerApproved);
        assert!(event.key.starts_with("dave:"));
        let Metadata::BitbucketServerActivity(activity) = event.metadata else {
            panic!("unexpected metadata");
        };
        assert_eq!(
            activity.created_at,
            Some(DateTime::parse_from_rfc3339("2026-01-05T08:00:00Z").unwrap().with_timezone(&Utc))
        );
    }

    #[test]
    fn ping_decodes_without_body() {
        assert!(matches!(
            decode("diagnostics:ping", b"").unwrap(),
            Some(BitbucketServerEvent::Ping)
        ));
    }

    #[test]
    fn build_status_targets_listed_pull_requests() {
        let body = json!({
            "commit": "abc",
            "status": {"key": "ci", "state": "FAILED", "dateAdded": 1767600000000i64},
            "pullRequests": [{"id": 11, "toRef": {"repository": {"id": 3}}}]
        });
        let event = decode("repo:build_status", body.to_string().as_bytes())
            .unwrap()
            .unwrap();
        let Normalization::Upsert { event, .. } = normalize(&event) else {
            panic!("expected upsert");
        };
        assert_eq!(event.key, "abc:ci");
    }

    #[test]
    fn unknown_keys_are_unrecognized() {
        assert!(decode("repo:refs_changed", b"{}").unwrap().is_none());
    }
}
