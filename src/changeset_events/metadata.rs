//! Typed metadata payloads stored alongside each changeset event.
//!
//! Metadata is persisted as JSON in `changeset_events.metadata`; the event
//! kind selects which struct the JSON decodes into. Merging always pairs two
//! values of the same shape and is a pure function of `(old, new)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ChangesetEventError, ChangesetEventKind};

/// Discriminant of [`Metadata`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataShape {
    GitHubActorTarget,
    GitHubStateChange,
    GitHubLabel,
    GitHubRenamedTitle,
    GitHubComment,
    GitHubReview,
    GitHubReviewDismissed,
    GitHubCommitStatus,
    GitHubCheck,
    BitbucketServerActivity,
    BitbucketServerCommitStatus,
    GitLabStateChange,
    GitLabPipeline,
    BitbucketCloudParticipant,
    BitbucketCloudComment,
    BitbucketCloudPullRequest,
    BitbucketCloudCommitStatus,
    AzureDevOpsVote,
}

/// Assignment or review request: someone acted on someone else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubActorTarget {
    pub actor: String,
    pub target: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubStateChange {
    pub actor: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubLabel {
    pub actor: String,
    pub name: String,
    pub color: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubRenamedTitle {
    pub actor: String,
    pub previous_title: String,
    pub current_title: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubComment {
    pub id: i64,
    pub author: String,
    pub body: String,
    pub url: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubReview {
    pub id: i64,
    pub author: String,
    /// Upper-cased review state, e.g. `APPROVED` or `CHANGES_REQUESTED`.
    pub state: String,
    pub body: String,
    pub commit_id: String,
    pub submitted_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubReviewDismissed {
    pub actor: String,
    pub review_id: i64,
    pub review_author: String,
    pub message: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubCommitStatus {
    pub sha: String,
    pub context: String,
    pub state: String,
    pub description: String,
    pub target_url: String,
    pub received_at: Option<DateTime<Utc>>,
}

/// Check suite or check run; both report `status` plus `conclusion`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubCheck {
    pub id: i64,
    pub name: String,
    pub head_sha: String,
    pub status: String,
    pub conclusion: String,
    pub received_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BitbucketServerActivity {
    pub actor: String,
    pub action: String,
    pub comment_id: i64,
    pub comment_text: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BitbucketServerCommitStatus {
    pub commit: String,
    pub key: String,
    pub name: String,
    pub state: String,
    pub url: String,
    pub date_added: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitLabStateChange {
    pub actor: String,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitLabPipeline {
    pub id: i64,
    pub status: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
    pub web_url: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BitbucketCloudParticipant {
    pub user: String,
    pub role: String,
    pub approved: bool,
    pub state: String,
    pub participated_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BitbucketCloudComment {
    pub id: i64,
    pub author: String,
    pub body: String,
    pub deleted: bool,
    pub created_on: Option<DateTime<Utc>>,
    pub updated_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BitbucketCloudPullRequest {
    pub id: i64,
    pub title: String,
    pub state: String,
    pub actor: String,
    pub updated_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BitbucketCloudCommitStatus {
    pub key: String,
    pub name: String,
    pub state: String,
    pub url: String,
    pub refname: String,
    pub commit: String,
    pub updated_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureDevOpsVote {
    pub event_id: String,
    pub reviewer: String,
    pub vote: i32,
    pub pull_request_status: String,
    pub created_date: Option<DateTime<Utc>>,
}

/// Metadata attached to a changeset event, one variant per payload shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Metadata {
    GitHubActorTarget(GitHubActorTarget),
    GitHubStateChange(GitHubStateChange),
    GitHubLabel(GitHubLabel),
    GitHubRenamedTitle(GitHubRenamedTitle),
    GitHubComment(GitHubComment),
    GitHubReview(GitHubReview),
    GitHubReviewDismissed(GitHubReviewDismissed),
    GitHubCommitStatus(GitHubCommitStatus),
    GitHubCheck(GitHubCheck),
    BitbucketServerActivity(BitbucketServerActivity),
    BitbucketServerCommitStatus(BitbucketServerCommitStatus),
    GitLabStateChange(GitLabStateChange),
    GitLabPipeline(GitLabPipeline),
    BitbucketCloudParticipant(BitbucketCloudParticipant),
    BitbucketCloudComment(BitbucketCloudComment),
    BitbucketCloudPullRequest(BitbucketCloudPullRequest),
    BitbucketCloudCommitStatus(BitbucketCloudCommitStatus),
    AzureDevOpsVote(AzureDevOpsVote),
}

impl Metadata {
    pub fn shape(&self) -> MetadataShape {
        match self {
            Metadata::GitHubActorTarget(_) => MetadataShape::GitHubActorTarget,
            Metadata::GitHubStateChange(_) => MetadataShape::GitHubStateChange,
            Metadata::GitHubLabel(_) => MetadataShape::GitHubLabel,
            Metadata::GitHubRenamedTitle(_) => MetadataShape::GitHubRenamedTitle,
            Metadata::GitHubComment(_) => MetadataShape::GitHubComment,
            Metadata::GitHubReview(_) => MetadataShape::GitHubReview,
            Metadata::GitHubReviewDismissed(_) => MetadataShape::GitHubReviewDismissed,
            Metadata::GitHubCommitStatus(_) => MetadataShape::GitHubCommitStatus,
            Metadata::GitHubCheck(_) => MetadataShape::GitHubCheck,
            Metadata::BitbucketServerActivity(_) => MetadataShape::BitbucketServerActivity,
            Metadata::BitbucketServerCommitStatus(_) => MetadataShape::BitbucketServerCommitStatus,
            Metadata::GitLabStateChange(_) => MetadataShape::GitLabStateChange,
            Metadata::GitLabPipeline(_) => MetadataShape::GitLabPipeline,
            Metadata::BitbucketCloudParticipant(_) => MetadataShape::BitbucketCloudParticipant,
            Metadata::BitbucketCloudComment(_) => MetadataShape::BitbucketCloudComment,
            Metadata::BitbucketCloudPullRequest(_) => MetadataShape::BitbucketCloudPullRequest,
            Metadata::BitbucketCloudCommitStatus(_) => MetadataShape::BitbucketCloudCommitStatus,
            Metadata::AzureDevOpsVote(_) => MetadataShape::AzureDevOpsVote,
        }
    }

    /// Decode stored JSON into the shape required by `kind`.
    pub fn decode(kind: ChangesetEventKind, value: Value) -> Result<Self, ChangesetEventError> {
        let invalid = |source| ChangesetEventError::InvalidMetadata {
            kind: kind.as_str(),
            source,
        };
        let metadata = match kind.shape() {
            MetadataShape::GitHubActorTarget => {
                Metadata::GitHubActorTarget(serde_json::from_value(value).map_err(invalid)?)
            }
            MetadataShape::GitHubStateChange => {
                Metadata::GitHubStateChange(serde_json::from_value(value).map_err(invalid)?)
            }
            MetadataShape::GitHubLabel => {
                Metadata::GitHubLabel(serde_json::from_value(value).map_err(invalid)?)
            }
            MetadataShape::GitHubRenamedTitle => {
                Metadata::GitHubRenamedTitle(serde_json::from_value(value).map_err(invalid)?)
            }
            MetadataShape::GitHubComment => {
                Metadata::GitHubComment(serde_json::from_value(value).map_err(invalid)?)
            }
            MetadataShape::GitHubReview => {
                Metadata::GitHubReview(serde_json::from_value(value).map_err(invalid)?)
            }
            MetadataShape::GitHubReviewDismissed => {
                Metadata::GitHubReviewDismissed(serde_json::from_value(value).map_err(invalid)?)
            }
            MetadataShape::GitHubCommitStatus => {
                Metadata::GitHubCommitStatus(serde_json::from_value(value).map_err(invalid)?)
            }
            MetadataShape::GitHubCheck => {
                Metadata::GitHubCheck(serde_json::from_value(value).map_err(invalid)?)
            }
            MetadataShape::BitbucketServerActivity => {
                Metadata::BitbucketServerActivity(serde_json::from_value(value).map_err(invalid)?)
            }
            MetadataShape::BitbucketServerCommitStatus => Metadata::BitbucketServerCommitStatus(
                serde_json::from_value(value).map_err(invalid)?,
            ),
            MetadataShape::GitLabStateChange => {
                Metadata::GitLabStateChange(serde_json::from_value(value).map_err(invalid)?)
            }
            MetadataShape::GitLabPipeline => {
                Metadata::GitLabPipeline(serde_json::from_value(value).map_err(invalid)?)
            }
            MetadataShape::BitbucketCloudParticipant => Metadata::BitbucketCloudParticipant(
                serde_json::from_value(value).map_err(invalid)?,
            ),
            MetadataShape::BitbucketCloudComment => {
                Metadata::BitbucketCloudComment(serde_json::from_value(value).map_err(invalid)?)
            }
            MetadataShape::BitbucketCloudPullRequest => Metadata::BitbucketCloudPullRequest(
                serde_json::from_value(value).map_err(invalid)?,
            ),
            MetadataShape::BitbucketCloudCommitStatus => Metadata::BitbucketCloudCommitStatus(
                serde_json::from_value(value).map_err(invalid)?,
            ),
            MetadataShape::AzureDevOpsVote => {
                Metadata::AzureDevOpsVote(serde_json::from_value(value).map_err(invalid)?)
            }
        };
        Ok(metadata)
    }

    /// Serialize the payload for storage.
    pub fn to_json(&self) -> Value {
        let encoded = match self {
            Metadata::GitHubActorTarget(m) => serde_json::to_value(m),
            Metadata::GitHubStateChange(m) => serde_json::to_value(m),
            Metadata::GitHubLabel(m) => serde_json::to_value(m),
            Metadata::GitHubRenamedTitle(m) => serde_json::to_value(m),
            Metadata::GitHubComment(m) => serde_json::to_value(m),
            Metadata::GitHubReview(m) => serde_json::to_value(m),
            Metadata::GitHubReviewDismissed(m) => serde_json::to_value(m),
            Metadata::GitHubCommitStatus(m) => serde_json::to_value(m),
            Metadata::GitHubCheck(m) => serde_json::to_value(m),
            Metadata::BitbucketServerActivity(m) => serde_json::to_value(m),
            Metadata::BitbucketServerCommitStatus(m) => serde_json::to_value(m),
            Metadata::GitLabStateChange(m) => serde_json::to_value(m),
            Metadata::GitLabPipeline(m) => serde_json::to_value(m),
            Metadata::BitbucketCloudParticipant(m) => serde_json::to_value(m),
            Metadata::BitbucketCloudComment(m) => serde_json::to_value(m),
            Metadata::BitbucketCloudPullRequest(m) => serde_json::to_value(m),
            Metadata::BitbucketCloudCommitStatus(m) => serde_json::to_value(m),
            Metadata::AzureDevOpsVote(m) => serde_json::to_value(m),
        };
        // Plain structs with string keys always serialize.
        encoded.unwrap_or(Value::Null)
    }

    /// Best timestamp the payload knows about, used to order timeline events.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Metadata::GitHubActorTarget(m) => m.created_at,
            Metadata::GitHubStateChange(m) => m.created_at,
            Metadata::GitHubLabel(m) => m.created_at,
            Metadata::GitHubRenamedTitle(m) => m.created_at,
            Metadata::GitHubComment(m) => m.updated_at.or(m.created_at),
            Metadata::GitHubReview(m) => m.submitted_at.or(m.updated_at),
            Metadata::GitHubReviewDismissed(m) => m.created_at,
            Metadata::GitHubCommitStatus(m) => m.received_at,
            Metadata::GitHubCheck(m) => m.received_at,
            Metadata::BitbucketServerActivity(m) => m.created_at,
            Metadata::BitbucketServerCommitStatus(m) => m.date_added,
            Metadata::GitLabStateChange(m) => m.updated_at,
            Metadata::GitLabPipeline(m) => m.updated_at.or(m.created_at),
            Metadata::BitbucketCloudParticipant(m) => m.participated_on,
            Metadata::BitbucketCloudComment(m) => m.updated_on.or(m.created_on),
            Metadata::BitbucketCloudPullRequest(m) => m.updated_on,
            Metadata::BitbucketCloudCommitStatus(m) => m.updated_on,
            Metadata::AzureDevOpsVote(m) => m.created_date,
        }
    }

    /// Combine previously stored metadata with a newer observation of the
    /// same event. Both sides must have the same shape.
    pub fn merge(old: Metadata, new: Metadata) -> Result<Metadata, ChangesetEventError> {
        use Metadata::*;
        let merged = match (old, new) {
            (GitHubActorTarget(o), GitHubActorTarget(n)) => GitHubActorTarget(o.merge(n)),
            (GitHubStateChange(o), GitHubStateChange(n)) => GitHubStateChange(o.merge(n)),
            (GitHubLabel(o), GitHubLabel(n)) => GitHubLabel(o.merge(n)),
            (GitHubRenamedTitle(o), GitHubRenamedTitle(n)) => GitHubRenamedTitle(o.merge(n)),
            (GitHubComment(o), GitHubComment(n)) => GitHubComment(o.merge(n)),
            (GitHubReview(o), GitHubReview(n)) => GitHubReview(o.merge(n)),
            (GitHubReviewDismissed(o), GitHubReviewDismissed(n)) => {
                GitHubReviewDismissed(o.merge(n))
            }
            (GitHubCheck(o), GitHubCheck(n)) => GitHubCheck(o.merge(n)),
            (BitbucketServerActivity(o), BitbucketServerActivity(n)) => {
                BitbucketServerActivity(o.merge(n))
            }
            (GitLabStateChange(o), GitLabStateChange(n)) => GitLabStateChange(o.merge(n)),
            // Status reports, pipelines and every Bitbucket Cloud and Azure
            // DevOps payload are snapshots: the newer one replaces the older.
            (GitHubCommitStatus(_), n @ GitHubCommitStatus(_))
            | (BitbucketServerCommitStatus(_), n @ BitbucketServerCommitStatus(_))
            | (GitLabPipeline(_), n @ GitLabPipeline(_))
            | (BitbucketCloudParticipant(_), n @ BitbucketCloudParticipant(_))
            | (BitbucketCloudComment(_), n @ BitbucketCloudComment(_))
            | (BitbucketCloudPullRequest(_), n @ BitbucketCloudPullRequest(_))
            | (BitbucketCloudCommitStatus(_), n @ BitbucketCloudCommitStatus(_))
            | (AzureDevOpsVote(_), n @ AzureDevOpsVote(_)) => n,
            (o, n) => {
                return Err(ChangesetEventError::ShapeMismatch {
                    original: o.shape(),
                    revised: n.shape(),
                });
            }
        };
        Ok(merged)
    }
}

fn prefer<T: Default + PartialEq>(old: T, new: T) -> T {
    if new == T::default() { old } else { new }
}

fn earliest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn latest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    a.max(b)
}

impl GitHubActorTarget {
    pub fn merge(self, newer: Self) -> Self {
        Self {
            actor: prefer(self.actor, newer.actor),
            target: prefer(self.target, newer.target),
            created_at: earliest(self.created_at, newer.created_at),
        }
    }
}

impl GitHubStateChange {
    pub fn merge(self, newer: Self) -> Self {
        Self {
            actor: prefer(self.actor, newer.actor),
            created_at: earliest(self.created_at, newer.created_at),
        }
    }
}

impl GitHubLabel {
    pub fn merge(self, newer: Self) -> Self {
        Self {
            actor: prefer(self.actor, newer.actor),
            name: prefer(self.name, newer.name),
            color: prefer(self.color, newer.color),
            created_at: earliest(self.created_at, newer.created_at),
        }
    }
}

impl GitHubRenamedTitle {
    pub fn merge(self, newer: Self) -> Self {
        Self {
            actor: prefer(self.actor, newer.actor),
            previous_title: prefer(self.previous_title, newer.previous_title),
            current_title: prefer(self.current_title, newer.current_title),
            created_at: earliest(self.created_at, newer.created_at),
        }
    }
}

impl GitHubComment {
    pub fn merge(self, newer: Self) -> Self {
        Self {
            id: prefer(self.id, newer.id),
            author: prefer(self.author, newer.author),
            body: prefer(self.body, newer.body),
            url: prefer(self.url, newer.url),
            created_at: earliest(self.created_at, newer.created_at),
            updated_at: latest(self.updated_at, newer.updated_at),
        }
    }
}

impl GitHubReview {
    pub fn merge(self, newer: Self) -> Self {
        Self {
            id: prefer(self.id, newer.id),
            author: prefer(self.author, newer.author),
            state: prefer(self.state, newer.state),
            body: prefer(self.body, newer.body),
            commit_id: prefer(self.commit_id, newer.commit_id),
            submitted_at: earliest(self.submitted_at, newer.submitted_at),
            updated_at: latest(self.updated_at, newer.updated_at),
        }
    }
}

impl GitHubReviewDismissed {
    pub fn merge(self, newer: Self) -> Self {
        Self {
            actor: prefer(self.actor, newer.actor),
            review_id: prefer(self.review_id, newer.review_id),
            review_author: prefer(self.review_author, newer.review_author),
            message: prefer(self.message, newer.message),
            created_at: earliest(self.created_at, newer.created_at),
        }
    }
}

impl GitHubCheck {
    pub fn merge(self, newer: Self) -> Self {
        Self {
            id: prefer(self.id, newer.id),
            name: prefer(self.name, newer.name),
            head_sha: prefer(self.head_sha, newer.head_sha),
            status: prefer(self.status, newer.status),
            conclusion: prefer(self.conclusion, newer.conclusion),
            received_at: latest(self.received_at, newer.received_at),
        }
    }
}

impl BitbucketServerActivity {
    pub fn merge(self, newer: Self) -> Self {
        Self {
            actor: prefer(self.actor, newer.actor),
            action: prefer(self.action, newer.action),
            comment_id: prefer(self.comment_id, newer.comment_id),
            comment_text: prefer(self.comment_text, newer.comment_text),
            created_at: earliest(self.created_at, newer.created_at),
        }
    }
}

impl GitLabStateChange {
    pub fn merge(self, newer: Self) -> Self {
        Self {
            actor: prefer(self.actor, newer.actor),
            updated_at: latest(self.updated_at, newer.updated_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(hour: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2026, 1, 5, hour, 0, 0).unwrap())
    }

    #[test]
    fn merge_fills_empty_fields_and_keeps_latest_update() {
        let old = Metadata::GitHubComment(GitHubComment {
            id: 7,
            author: "alice".into(),
            body: "first".into(),
            url: String::new(),
            created_at: at(1),
            updated_at: at(3),
        });
        let new = Metadata::GitHubComment(GitHubComment {
            id: 7,
            author: String::new(),
            body: "edited".into(),
            url: "https://example.com/c/7".into(),
            created_at: at(2),
            updated_at: at(2),
        });

        let Metadata::GitHubComment(merged) = Metadata::merge(old, new).unwrap() else {
            panic!("shape changed");
        };
        assert_eq!(merged.author, "alice");
        assert_eq!(merged.body, "edited");
        assert_eq!(merged.url, "https://example.com/c/7");
        assert_eq!(merged.created_at, at(1));
        assert_eq!(merged.updated_at, at(3));
    }

    #[test]
    fn merge_is_idempotent() {
        let review = Metadata::GitHubReview(GitHubReview {
            id: 1,
            author: "bob".into(),
            state: "APPROVED".into(),
            submitted_at: at(4),
            ..Default::default()
        });
        let once = Metadata::merge(review.clone(), review.clone()).unwrap();
        assert_eq!(once, review);
        let twice = Metadata::merge(once.clone(), review).unwrap();
        assert_eq!(twice, once);
    }

    #[test]
    fn snapshots_are_replaced_wholesale() {
        let old = Metadata::GitLabPipeline(GitLabPipeline {
            id: 9,
            status: "running".into(),
            web_url: "https://gitlab.example.com/p/9".into(),
            ..Default::default()
        });
        let new = Metadata::GitLabPipeline(GitLabPipeline {
            id: 9,
            status: "success".into(),
            ..Default::default()
        });
        let merged = Metadata::merge(old, new.clone()).unwrap();
        assert_eq!(merged, new);
    }

    #[test]
    fn merge_rejects_mismatched_shapes() {
        let err = Metadata::merge(
            Metadata::GitHubStateChange(Default::default()),
            Metadata::GitLabStateChange(Default::default()),
        )
        .unwrap_err();
        assert!(matches!(err, ChangesetEventError::ShapeMismatch { .. }));
    }

    #[test]
    fn decode_uses_kind_shape() {
        let metadata = Metadata::decode(
            ChangesetEventKind::BitbucketServerCommitStatus,
            json!({"commit": "abc", "key": "ci", "state": "SUCCESSFUL"}),
        )
        .unwrap();
        let Metadata::BitbucketServerCommitStatus(status) = &metadata else {
            panic!("unexpected shape");
        };
        assert_eq!(status.state, "SUCCESSFUL");
        let stored = metadata.to_json();
        assert_eq!(
            Metadata::decode(ChangesetEventKind::BitbucketServerCommitStatus, stored).unwrap(),
            metadata
        );

        let err = Metadata::decode(ChangesetEventKind::GitHubReviewed, json!({"id": "nope"}));
        assert!(matches!(err, Err(ChangesetEventError::InvalidMetadata { .. })));
    }
}
