//! Derived changeset state computed from the stored event timeline.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

use super::{ChangesetEventKind, Metadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Pending,
    Commented,
    Dismissed,
}

impl ReviewState {
    pub const fn as_str(self) -> &'static str {
        match self {
            ReviewState::Approved => "APPROVED",
            ReviewState::ChangesRequested => "CHANGES_REQUESTED",
            ReviewState::Pending => "PENDING",
            ReviewState::Commented => "COMMENTED",
            ReviewState::Dismissed => "DISMISSED",
        }
    }

    /// Parse a GitHub review state. Unrecognized values are treated as pending.
    pub fn from_github(state: &str) -> Self {
        match state.to_ascii_uppercase().as_str() {
            "APPROVED" => ReviewState::Approved,
            "CHANGES_REQUESTED" => ReviewState::ChangesRequested,
            "COMMENTED" => ReviewState::Commented,
            "DISMISSED" => ReviewState::Dismissed,
            _ => ReviewState::Pending,
        }
    }
}

impl fmt::Display for ReviewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckState {
    Unknown,
    Pending,
    Passed,
    Failed,
}

impl CheckState {
    pub const fn as_str(self) -> &'static str {
        match self {
            CheckState::Unknown => "UNKNOWN",
            CheckState::Pending => "PENDING",
            CheckState::Passed => "PASSED",
            CheckState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalState {
    Open,
    Draft,
    Closed,
    Merged,
}

impl ExternalState {
    pub const fn as_str(self) -> &'static str {
        match self {
            ExternalState::Open => "OPEN",
            ExternalState::Draft => "DRAFT",
            ExternalState::Closed => "CLOSED",
            ExternalState::Merged => "MERGED",
        }
    }
}

impl fmt::Display for ExternalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored event as seen by the state computation.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub kind: ChangesetEventKind,
    pub metadata: Metadata,
    /// Row creation time, used when the payload carries no timestamp.
    pub recorded_at: DateTime<Utc>,
}

impl TimelineEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.metadata.timestamp().unwrap_or(self.recorded_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivedState {
    pub review: ReviewState,
    pub check: CheckState,
    /// `None` when no event in the timeline says anything about the state.
    pub external: Option<ExternalState>,
}

/// Recompute review, check and external state from a full timeline.
pub fn derive(events: &[TimelineEvent]) -> DerivedState {
    let mut ordered: Vec<&TimelineEvent> = events.iter().collect();
    ordered.sort_by_key(|event| event.timestamp());

    DerivedState {
        review: review_state(&ordered),
        check: check_state(&ordered),
        external: external_state(&ordered),
    }
}

fn review_state(events: &[&TimelineEvent]) -> ReviewState {
    let mut by_author: HashMap<String, ReviewState> = HashMap::new();
    for event in events {
        let Some((author, state)) = review_contribution(event) else {
            continue;
        };
        match state {
            ReviewState::Dismissed => {
                by_author.remove(&author);
            }
            ReviewState::Commented => {}
            other => {
                by_author.insert(author, other);
            }
        }
    }

    let states = by_author.values();
    let mut result = ReviewState::Pending;
    for state in states {
        match state {
            ReviewState::ChangesRequested => return ReviewState::ChangesRequested,
            ReviewState::Approved => result = ReviewState::Approved,
            _ => {}
        }
    }
    result
}

fn review_contribution(event: &TimelineEvent) -> Option<(String, ReviewState)> {
    use ChangesetEventKind::*;
    let state = match event.kind {
        GitHubReviewed => {
            if let Metadata::GitHubReview(review) = &event.metadata {
                return Some((review.author.clone(), ReviewState::from_github(&review.state)));
            }
            return None;
        }
        GitHubReviewDismissed => {
            if let Metadata::GitHubReviewDismissed(dismissal) = &event.metadata {
                return Some((dismissal.review_author.clone(), ReviewState::Dismissed));
            }
            return None;
        }
        BitbucketServerApproved
        | BitbucketCloudPullRequestApproved
        | AzureDevOpsPullRequestApproved => ReviewState::Approved,
        BitbucketServerReviewed
        | BitbucketCloudPullRequestChangesRequestCreated
        | AzureDevOpsPullRequestWaitingForAuthor
        | AzureDevOpsPullRequestApprovedWithSuggestions => ReviewState::ChangesRequested,
        BitbucketServerUnapproved
        | BitbucketCloudPullRequestUnapproved
        | BitbucketCloudPullRequestChangesRequestRemoved
        | AzureDevOpsPullRequestRejected => ReviewState::Dismissed,
        _ => return None,
    };

    let author = match &event.metadata {
        Metadata::BitbucketServerActivity(activity) => activity.actor.clone(),
        Metadata::BitbucketCloudParticipant(participant) => participant.user.clone(),
        Metadata::AzureDevOpsVote(vote) => vote.reviewer.clone(),
        _ => return None,
    };
    Some((author, state))
}

fn check_state(events: &[&TimelineEvent]) -> CheckState {
    let mut by_context: HashMap<String, CheckState> = HashMap::new();
    for event in events {
        if let Some((context, state)) = check_contribution(event) {
            by_context.insert(context, state);
        }
    }
    if by_context.is_empty() {
        return CheckState::Unknown;
    }

    let mut result = CheckState::Passed;
    for state in by_context.values() {
        match state {
            CheckState::Failed => return CheckState::Failed,
            CheckState::Pending => result = CheckState::Pending,
            _ => {}
        }
    }
    result
}

fn check_contribution(event: &TimelineEvent) -> Option<(String, CheckState)> {
    match &event.metadata {
        Metadata::GitHubCommitStatus(status) => Some((
            format!("status:{}", status.context),
            match status.state.as_str() {
                "success" => CheckState::Passed,
                "failure" | "error" => CheckState::Failed,
                _ => CheckState::Pending,
            },
        )),
        Metadata::GitHubCheck(check) => {
            let context = if check.name.is_empty() {
                format!("check:{}", check.id)
            } else {
                format!("check:{}", check.name)
            };
            let state = if check.status != "completed" {
                CheckState::Pending
            } else {
                match check.conclusion.as_str() {
                    "success" | "neutral" | "skipped" => CheckState::Passed,
                    "failure" | "timed_out" | "cancelled" | "action_required" => {
                        CheckState::Failed
                    }
                    _ => CheckState::Pending,
                }
            };
            Some((context, state))
        }
        Metadata::BitbucketServerCommitStatus(status) => Some((
            format!("status:{}", status.key),
            bitbucket_build_state(&status.state),
        )),
        Metadata::BitbucketCloudCommitStatus(status) => Some((
            format!("status:{}", status.key),
            bitbucket_build_state(&status.state),
        )),
        // Only the most recent pipeline describes the merge request.
        Metadata::GitLabPipeline(pipeline) => Some((
            "pipeline".to_string(),
            match pipeline.status.as_str() {
                "success" => CheckState::Passed,
                "failed" | "canceled" => CheckState::Failed,
                _ => CheckState::Pending,
            },
        )),
        _ => None,
    }
}

fn bitbucket_build_state(state: &str) -> CheckState {
    match state {
        "SUCCESSFUL" => CheckState::Passed,
        "FAILED" | "STOPPED" => CheckState::Failed,
        _ => CheckState::Pending,
    }
}

fn external_state(events: &[&TimelineEvent]) -> Option<ExternalState> {
    use ChangesetEventKind::*;
    let mut current = None;
    for event in events {
        let next = match event.kind {
            GitHubClosed | BitbucketServerDeclined | GitLabClosed
            | BitbucketCloudPullRequestRejected => ExternalState::Closed,
            GitHubMerged | BitbucketServerMerged | GitLabMerged
            | BitbucketCloudPullRequestFulfilled => ExternalState::Merged,
            GitHubReopened | GitHubReadyForReview | BitbucketServerOpened
            | BitbucketServerReopened | GitLabReopened => ExternalState::Open,
            GitHubConvertToDraft => ExternalState::Draft,
            _ => continue,
        };
        if current == Some(ExternalState::Merged) {
            break;
        }
        current = Some(next);
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset_events::metadata::*;
    use chrono::{Duration, TimeZone};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap()
    }

    fn event(kind: ChangesetEventKind, metadata: Metadata, minutes: i64) -> TimelineEvent {
        TimelineEvent {
            kind,
            metadata,
            recorded_at: base() + Duration::minutes(minutes),
        }
    }

    fn bbs(actor: &str) -> Metadata {
        Metadata::BitbucketServerActivity(BitbucketServerActivity {
            actor: actor.into(),
            ..Default::default()
        })
    }

    #[test]
    fn empty_timeline_is_pending_and_unknown() {
        let state = derive(&[]);
        assert_eq!(state.review, ReviewState::Pending);
        assert_eq!(state.check, CheckState::Unknown);
        assert_eq!(state.external, None);
    }

    #[test]
    fn changes_requested_beats_approval() {
        let events = vec![
            event(ChangesetEventKind::BitbucketServerApproved, bbs("alice"), 1),
            event(ChangesetEventKind::BitbucketServerReviewed, bbs("bob"), 2),
        ];
        assert_eq!(derive(&events).review, ReviewState::ChangesRequested);
    }

    #[test]
    fn unapproval_clears_the_authors_vote() {
        let events = vec![
            event(ChangesetEventKind::BitbucketServerApproved, bbs("alice"), 1),
            event(ChangesetEventKind::BitbucketServerUnapproved, bbs("alice"), 2),
        ];
        assert_eq!(derive(&events).review, ReviewState::Pending);
    }

    #[test]
    fn invalid_github_review_state_counts_as_pending() {
        let review = Metadata::GitHubReview(GitHubReview {
            author: "alice".into(),
            state: "SHRUGGED".into(),
            ..Default::default()
        });
        let events = vec![event(ChangesetEventKind::GitHubReviewed, review, 1)];
        assert_eq!(derive(&events).review, ReviewState::Pending);
    }

    #[test]
    fn latest_status_per_context_wins() {
        let status = |state: &str, minutes: i64| {
            event(
                ChangesetEventKind::GitHubCommitStatus,
                Metadata::GitHubCommitStatus(GitHubCommitStatus {
                    context: "ci".into(),
                    state: state.into(),
                    ..Default::default()
                }),
                minutes,
            )
        };
        let events = vec![status("pending", 1), status("failure", 2), status("success", 3)];
        assert_eq!(derive(&events).check, CheckState::Passed);

        let events = vec![status("success", 1), status("error", 2)];
        assert_eq!(derive(&events).check, CheckState::Failed);
    }

    #[test]
    fn merged_is_terminal() {
        let events = vec![
            event(
                ChangesetEventKind::GitLabMerged,
                Metadata::GitLabStateChange(Default::default()),
                1,
            ),
            event(
                ChangesetEventKind::GitLabReopened,
                Metadata::GitLabStateChange(Default::default()),
                2,
            ),
        ];
        assert_eq!(derive(&events).external, Some(ExternalState::Merged));
    }

    #[test]
    fn closed_then_reopened_is_open() {
        let events = vec![
            event(
                ChangesetEventKind::GitHubClosed,
                Metadata::GitHubStateChange(Default::default()),
                1,
            ),
            event(
                ChangesetEventKind::GitHubReopened,
                Metadata::GitHubStateChange(Default::default()),
                2,
            ),
        ];
        assert_eq!(derive(&events).external, Some(ExternalState::Open));
    }
}
