//! Changeset event kinds, typed metadata and derived state.
//!
//! Every normalized webhook event carries a [`ChangesetEventKind`], a key that
//! is stable within (changeset, kind) and a typed [`Metadata`] payload. The
//! kind determines which metadata shape is valid for it; the shape determines
//! the merge policy applied when the same event is seen twice.

use std::fmt;

use thiserror::Error;

pub mod metadata;
pub mod state;

pub use metadata::{Metadata, MetadataShape};
pub use state::{CheckState, DerivedState, ExternalState, ReviewState, TimelineEvent, derive};

/// Canonical registry of changeset event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangesetEventKind {
    GitHubAssigned,
    GitHubUnassigned,
    GitHubClosed,
    GitHubMerged,
    GitHubReopened,
    GitHubReadyForReview,
    GitHubConvertToDraft,
    GitHubLabeled,
    GitHubUnlabeled,
    GitHubRenamedTitle,
    GitHubReviewRequested,
    GitHubReviewRequestRemoved,
    GitHubCommented,
    GitHubReviewCommented,
    GitHubReviewed,
    GitHubReviewDismissed,
    GitHubCommitStatus,
    GitHubCheckSuite,
    GitHubCheckRun,

    BitbucketServerApproved,
    BitbucketServerUnapproved,
    BitbucketServerReviewed,
    BitbucketServerDeclined,
    BitbucketServerOpened,
    BitbucketServerReopened,
    BitbucketServerRescoped,
    BitbucketServerUpdated,
    BitbucketServerCommented,
    BitbucketServerMerged,
    BitbucketServerCommitStatus,

    GitLabClosed,
    GitLabMerged,
    GitLabReopened,
    GitLabPipeline,

    BitbucketCloudPullRequestApproved,
    BitbucketCloudPullRequestUnapproved,
    BitbucketCloudPullRequestChangesRequestCreated,
    BitbucketCloudPullRequestChangesRequestRemoved,
    BitbucketCloudPullRequestCommentCreated,
    BitbucketCloudPullRequestCommentUpdated,
    BitbucketCloudPullRequestCommentDeleted,
    BitbucketCloudPullRequestFulfilled,
    BitbucketCloudPullRequestRejected,
    BitbucketCloudPullRequestUpdated,
    BitbucketCloudRepoCommitStatusCreated,
    BitbucketCloudRepoCommitStatusUpdated,

    AzureDevOpsPullRequestApproved,
    AzureDevOpsPullRequestApprovedWithSuggestions,
    AzureDevOpsPullRequestWaitingForAuthor,
    AzureDevOpsPullRequestRejected,
}

impl ChangesetEventKind {
    /// Return the canonical string stored in `changeset_events.kind`.
    pub const fn as_str(self) -> &'static str {
        use ChangesetEventKind::*;
        match self {
            GitHubAssigned => "github:assigned",
            GitHubUnassigned => "github:unassigned",
            GitHubClosed => "github:closed",
            GitHubMerged => "github:merged",
            GitHubReopened => "github:reopened",
            GitHubReadyForReview => "github:ready_for_review",
            GitHubConvertToDraft => "github:convert_to_draft",
            GitHubLabeled => "github:labeled",
            GitHubUnlabeled => "github:unlabeled",
            GitHubRenamedTitle => "github:renamed",
            GitHubReviewRequested => "github:review_requested",
            GitHubReviewRequestRemoved => "github:review_request_removed",
            GitHubCommented => "github:commented",
            GitHubReviewCommented => "github:review_commented",
            GitHubReviewed => "github:reviewed",
            GitHubReviewDismissed => "github:review_dismissed",
            GitHubCommitStatus => "github:commit_status",
            GitHubCheckSuite => "github:check_suite",
            GitHubCheckRun => "github:check_run",

            BitbucketServerApproved => "bitbucketserver:approved",
            BitbucketServerUnapproved => "bitbucketserver:unapproved",
            BitbucketServerReviewed => "bitbucketserver:reviewed",
            BitbucketServerDeclined => "bitbucketserver:declined",
            BitbucketServerOpened => "bitbucketserver:opened",
            BitbucketServerReopened => "bitbucketserver:reopened",
            BitbucketServerRescoped => "bitbucketserver:rescoped",
            BitbucketServerUpdated => "bitbucketserver:updated",
            BitbucketServerCommented => "bitbucketserver:commented",
            BitbucketServerMerged => "bitbucketserver:merged",
            BitbucketServerCommitStatus => "bitbucketserver:commit_status",

            GitLabClosed => "gitlab:closed",
            GitLabMerged => "gitlab:merged",
            GitLabReopened => "gitlab:reopened",
            GitLabPipeline => "gitlab:pipeline",

            BitbucketCloudPullRequestApproved => "bitbucketcloud:pullrequest:approved",
            BitbucketCloudPullRequestUnapproved => "bitbucketcloud:pullrequest:unapproved",
            BitbucketCloudPullRequestChangesRequestCreated => {
                "bitbucketcloud:pullrequest:changes_request_created"
            }
            BitbucketCloudPullRequestChangesRequestRemoved => {
                "bitbucketcloud:pullrequest:changes_request_removed"
            }
            BitbucketCloudPullRequestCommentCreated => "bitbucketcloud:pullrequest:comment_created",
            BitbucketCloudPullRequestCommentUpdated => "bitbucketcloud:pullrequest:comment_updated",
            BitbucketCloudPullRequestCommentDeleted => "bitbucketcloud:pullrequest:comment_deleted",
            BitbucketCloudPullRequestFulfilled => "bitbucketcloud:pullrequest:fulfilled",
            BitbucketCloudPullRequestRejected => "bitbucketcloud:pullrequest:rejected",
            BitbucketCloudPullRequestUpdated => "bitbucketcloud:pullrequest:updated",
            BitbucketCloudRepoCommitStatusCreated => "bitbucketcloud:repo:commit_status_created",
            BitbucketCloudRepoCommitStatusUpdated => "bitbucketcloud:repo:commit_status_updated",

            AzureDevOpsPullRequestApproved => "azuredevops:pullrequest:approved",
            AzureDevOpsPullRequestApprovedWithSuggestions => {
                "azuredevops:pullrequest:approved_with_suggestions"
            }
            AzureDevOpsPullRequestWaitingForAuthor => "azuredevops:pullrequest:waiting_for_author",
            AzureDevOpsPullRequestRejected => "azuredevops:pullrequest:rejected",
        }
    }

    /// The metadata shape events of this kind must carry.
    pub const fn shape(self) -> MetadataShape {
        use ChangesetEventKind::*;
        match self {
            GitHubAssigned | GitHubUnassigned | GitHubReviewRequested
            | GitHubReviewRequestRemoved => MetadataShape::GitHubActorTarget,
            GitHubClosed | GitHubMerged | GitHubReopened | GitHubReadyForReview
            | GitHubConvertToDraft => MetadataShape::GitHubStateChange,
            GitHubLabeled | GitHubUnlabeled => MetadataShape::GitHubLabel,
            GitHubRenamedTitle => MetadataShape::GitHubRenamedTitle,
            GitHubCommented | GitHubReviewCommented => MetadataShape::GitHubComment,
            GitHubReviewed => MetadataShape::GitHubReview,
            GitHubReviewDismissed => MetadataShape::GitHubReviewDismissed,
            GitHubCommitStatus => MetadataShape::GitHubCommitStatus,
            GitHubCheckSuite | GitHubCheckRun => MetadataShape::GitHubCheck,

            BitbucketServerApproved
            | BitbucketServerUnapproved
            | BitbucketServerReviewed
            | BitbucketServerDeclined
            | BitbucketServerOpened
            | BitbucketServerReopened
            | BitbucketServerRescoped
            | BitbucketServerUpdated
            | BitbucketServerCommented
            | BitbucketServerMerged => MetadataShape::BitbucketServerActivity,
            BitbucketServerCommitStatus => MetadataShape::BitbucketServerCommitStatus,

            GitLabClosed | GitLabMerged | GitLabReopened => MetadataShape::GitLabStateChange,
            GitLabPipeline => MetadataShape::GitLabPipeline,

            BitbucketCloudPullRequestApproved
            | BitbucketCloudPullRequestUnapproved
            | BitbucketCloudPullRequestChangesRequestCreated
            | BitbucketCloudPullRequestChangesRequestRemoved => {
                MetadataShape::BitbucketCloudParticipant
            }
            BitbucketCloudPullRequestCommentCreated
            | BitbucketCloudPullRequestCommentUpdated
            | BitbucketCloudPullRequestCommentDeleted => MetadataShape::BitbucketCloudComment,
            BitbucketCloudPullRequestFulfilled
            | BitbucketCloudPullRequestRejected
            | BitbucketCloudPullRequestUpdated => MetadataShape::BitbucketCloudPullRequest,
            BitbucketCloudRepoCommitStatusCreated | BitbucketCloudRepoCommitStatusUpdated => {
                MetadataShape::BitbucketCloudCommitStatus
            }

            AzureDevOpsPullRequestApproved
            | AzureDevOpsPullRequestApprovedWithSuggestions
            | AzureDevOpsPullRequestWaitingForAuthor
            | AzureDevOpsPullRequestRejected => MetadataShape::AzureDevOpsVote,
        }
    }
}

impl fmt::Display for ChangesetEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete registry of kinds.
pub const ALL_CHANGESET_EVENT_KINDS: &[ChangesetEventKind] = &[
    ChangesetEventKind::GitHubAssigned,
    ChangesetEventKind::GitHubUnassigned,
    ChangesetEventKind::GitHubClosed,
    ChangesetEventKind::GitHubMerged,
    ChangesetEventKind::GitHubReopened,
    ChangesetEventKind::GitHubReadyForReview,
    ChangesetEventKind::GitHubConvertToDraft,
    ChangesetEventKind::GitHubLabeled,
    ChangesetEventKind::GitHubUnlabeled,
    ChangesetEventKind::GitHubRenamedTitle,
    ChangesetEventKind::GitHubReviewRequested,
    ChangesetEventKind::GitHubReviewRequestRemoved,
    ChangesetEventKind::GitHubCommented,
    ChangesetEventKind::GitHubReviewCommented,
    ChangesetEventKind::GitHubReviewed,
    ChangesetEventKind::GitHubReviewDismissed,
    ChangesetEventKind::GitHubCommitStatus,
    ChangesetEventKind::GitHubCheckSuite,
    ChangesetEventKind::GitHubCheckRun,
    ChangesetEventKind::BitbucketServerApproved,
    ChangesetEventKind::BitbucketServerUnapproved,
    ChangesetEventKind::BitbucketServerReviewed,
    ChangesetEventKind::BitbucketServerDeclined,
    ChangesetEventKind::BitbucketServerOpened,
    ChangesetEventKind::BitbucketServerReopened,
    ChangesetEventKind::BitbucketServerRescoped,
    ChangesetEventKind::BitbucketServerUpdated,
    ChangesetEventKind::BitbucketServerCommented,
    ChangesetEventKind::BitbucketServerMerged,
    ChangesetEventKind::BitbucketServerCommitStatus,
    ChangesetEventKind::GitLabClosed,
    ChangesetEventKind::GitLabMerged,
    ChangesetEventKind::GitLabReopened,
    ChangesetEventKind::GitLabPipeline,
    ChangesetEventKind::BitbucketCloudPullRequestApproved,
    ChangesetEventKind::BitbucketCloudPullRequestUnapproved,
    ChangesetEventKind::BitbucketCloudPullRequestChangesRequestCreated,
    ChangesetEventKind::BitbucketCloudPullRequestChangesRequestRemoved,
    ChangesetEventKind::BitbucketCloudPullRequestCommentCreated,
    ChangesetEventKind::BitbucketCloudPullRequestCommentUpdated,
    ChangesetEventKind::BitbucketCloudPullRequestCommentDeleted,
    ChangesetEventKind::BitbucketCloudPullRequestFulfilled,
    ChangesetEventKind::BitbucketCloudPullRequestRejected,
    ChangesetEventKind::BitbucketCloudPullRequestUpdated,
    ChangesetEventKind::BitbucketCloudRepoCommitStatusCreated,
    ChangesetEventKind::BitbucketCloudRepoCommitStatusUpdated,
    ChangesetEventKind::AzureDevOpsPullRequestApproved,
    ChangesetEventKind::AzureDevOpsPullRequestApprovedWithSuggestions,
    ChangesetEventKind::AzureDevOpsPullRequestWaitingForAuthor,
    ChangesetEventKind::AzureDevOpsPullRequestRejected,
];

/// Return the kind corresponding to the stored string, if any.
pub fn parse_changeset_event_kind(kind: &str) -> Option<ChangesetEventKind> {
    ALL_CHANGESET_EVENT_KINDS
        .iter()
        .copied()
        .find(|k| k.as_str() == kind)
}

/// A webhook event reduced to what the timeline stores.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub kind: ChangesetEventKind,
    pub key: String,
    pub metadata: Metadata,
}

impl NormalizedEvent {
    pub fn new(kind: ChangesetEventKind, key: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            kind,
            key: key.into(),
            metadata,
        }
    }
}

/// Returns the kind of a normalized event after checking that its metadata
/// has the shape the kind requires.
pub fn kind_for(event: &NormalizedEvent) -> Result<ChangesetEventKind, ChangesetEventError> {
    if event.kind.shape() != event.metadata.shape() {
        return Err(ChangesetEventError::UnmappedMetadata {
            kind: event.kind.as_str(),
            shape: event.metadata.shape(),
        });
    }
    Ok(event.kind)
}

/// Errors raised while decoding or merging timeline events.
#[derive(Debug, Error)]
pub enum ChangesetEventError {
    #[error("unknown changeset event kind {0:?}")]
    UnknownKind(String),
    #[error("metadata shape {shape:?} is not valid for kind {kind}")]
    UnmappedMetadata {
        kind: &'static str,
        shape: MetadataShape,
    },
    #[error("cannot merge {revised:?} metadata into {original:?} metadata")]
    ShapeMismatch {
        original: MetadataShape,
        revised: MetadataShape,
    },
    #[error("invalid {kind} metadata: {source}")]
    InvalidMetadata {
        kind: &'static str,
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn registry_has_unique_entries() {
        let mut seen = HashSet::new();
        for kind in ALL_CHANGESET_EVENT_KINDS {
            assert!(seen.insert(kind.as_str()), "duplicate kind {}", kind);
        }
    }

    #[test]
    fn parse_round_trips() {
        for kind in ALL_CHANGESET_EVENT_KINDS {
            let parsed = parse_changeset_event_kind(kind.as_str()).expect("kind should parse");
            assert_eq!(*kind, parsed);
        }
        assert_eq!(parse_changeset_event_kind("gerrit:change:approved"), None);
    }

    #[test]
    fn kind_for_rejects_mismatched_metadata() {
        let event = NormalizedEvent::new(
            ChangesetEventKind::GitLabPipeline,
            "1",
            Metadata::GitHubCommitStatus(Default::default()),
        );
        assert!(matches!(
            kind_for(&event),
            Err(ChangesetEventError::UnmappedMetadata { .. })
        ));

        let event = NormalizedEvent::new(
            ChangesetEventKind::GitLabPipeline,
            "1",
            Metadata::GitLabPipeline(Default::default()),
        );
        assert_eq!(kind_for(&event).unwrap(), ChangesetEventKind::GitLabPipeline);
    }
}
