//! Code host webhook payloads: decoding, normalization and routing.
//!
//! Each code host module exposes the same two operations:
//!
//! - `decode(event_type, body)` parses the raw body into that host's event
//!   enum. `Ok(None)` marks an event type the gateway does not act on.
//! - `normalize(&event)` reduces a decoded event to a [`Normalization`] that
//!   the changeset handler can apply.

use std::fmt;

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::changeset_events::NormalizedEvent;

pub mod azure_devops;
pub mod bitbucket_cloud;
pub mod bitbucket_server;
pub mod changesets;
pub mod github;
pub mod gitlab;
pub mod router;

pub use router::{DispatchContext, DispatchOutcome, WebhookHandler, WebhookRouter};

/// Code host families the gateway accepts webhooks from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeHostKind {
    GitHub,
    GitLab,
    BitbucketServer,
    BitbucketCloud,
    AzureDevOps,
}

impl CodeHostKind {
    /// Value stored in `webhook_registrations.code_host_kind`.
    pub const fn as_str(self) -> &'static str {
        match self {
            CodeHostKind::GitHub => "GITHUB",
            CodeHostKind::GitLab => "GITLAB",
            CodeHostKind::BitbucketServer => "BITBUCKETSERVER",
            CodeHostKind::BitbucketCloud => "BITBUCKETCLOUD",
            CodeHostKind::AzureDevOps => "AZUREDEVOPS",
        }
    }

    /// Value stored in `repos.service_type` and `changesets.external_service_type`.
    pub const fn service_type(self) -> &'static str {
        match self {
            CodeHostKind::GitHub => "github",
            CodeHostKind::GitLab => "gitlab",
            CodeHostKind::BitbucketServer => "bitbucketServer",
            CodeHostKind::BitbucketCloud => "bitbucketCloud",
            CodeHostKind::AzureDevOps => "azuredevops",
        }
    }

    /// Header (or body field) that names the event type for this host.
    pub const fn event_type_source(self) -> &'static str {
        match self {
            CodeHostKind::GitHub => "X-GitHub-Event",
            CodeHostKind::GitLab => "object_kind",
            CodeHostKind::BitbucketServer | CodeHostKind::BitbucketCloud => "X-Event-Key",
            CodeHostKind::AzureDevOps => "eventType",
        }
    }
}

impl fmt::Display for CodeHostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const ALL_CODE_HOST_KINDS: &[CodeHostKind] = &[
    CodeHostKind::GitHub,
    CodeHostKind::GitLab,
    CodeHostKind::BitbucketServer,
    CodeHostKind::BitbucketCloud,
    CodeHostKind::AzureDevOps,
];

/// Parse a stored code host kind. Case-insensitive.
pub fn parse_code_host_kind(kind: &str) -> Option<CodeHostKind> {
    ALL_CODE_HOST_KINDS
        .iter()
        .copied()
        .find(|k| k.as_str().eq_ignore_ascii_case(kind))
}

/// Canonical form of a code host base URL: parsed, lower-cased host, no
/// trailing slash.
pub fn normalize_code_host_url(raw: &str) -> Result<String, url::ParseError> {
    let parsed = url::Url::parse(raw.trim())?;
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

/// Identity of a pull request on the code host. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrIdentity {
    pub id: String,
    pub repo_external_id: String,
}

impl PrIdentity {
    pub fn new(id: impl ToString, repo_external_id: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            repo_external_id: repo_external_id.into(),
        }
    }

    /// Payloads occasionally omit the pull request or repository; such
    /// identities decode to empty strings or zero and cannot be resolved.
    pub fn is_resolvable(&self) -> bool {
        let blank = |value: &str| value.is_empty() || value == "0";
        !blank(&self.id) && !blank(&self.repo_external_id)
    }
}

impl fmt::Display for PrIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.repo_external_id, self.id)
    }
}

/// Key for events that are identified by who did what when.
pub(crate) fn actor_key(actor: &str, at: Option<DateTime<Utc>>) -> String {
    let nanos = at.and_then(|at| at.timestamp_nanos_opt()).unwrap_or_default();
    format!("{actor}:{nanos}")
}

/// Which changesets a normalized event applies to.
#[derive(Debug, Clone, PartialEq)]
pub enum Targets {
    Pulls(Vec<PrIdentity>),
    /// Commit status payloads only name branches; every tracked changeset of
    /// the repository on one of those branches receives the event.
    Branches {
        repo_external_id: String,
        branches: Vec<String>,
    },
}

/// What the changeset handler should do with a decoded event.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalization {
    Upsert {
        targets: Targets,
        event: NormalizedEvent,
    },
    /// The payload is too thin to merge; ask the syncer to refetch the
    /// changeset from the code host instead.
    Resync(PrIdentity),
    Skip,
}

/// A decoded webhook payload from any code host.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    GitHub(github::GitHubEvent),
    GitLab(gitlab::GitLabEvent),
    BitbucketServer(bitbucket_server::BitbucketServerEvent),
    BitbucketCloud(bitbucket_cloud::BitbucketCloudEvent),
    AzureDevOps(azure_devops::AzureDevOpsEvent),
}

impl WebhookEvent {
    pub fn code_host_kind(&self) -> CodeHostKind {
        match self {
            WebhookEvent::GitHub(_) => CodeHostKind::GitHub,
            WebhookEvent::GitLab(_) => CodeHostKind::GitLab,
            WebhookEvent::BitbucketServer(_) => CodeHostKind::BitbucketServer,
            WebhookEvent::BitbucketCloud(_) => CodeHostKind::BitbucketCloud,
            WebhookEvent::AzureDevOps(_) => CodeHostKind::AzureDevOps,
        }
    }

    pub fn normalize(&self) -> Normalization {
        match self {
            WebhookEvent::GitHub(event) => github::normalize(event),
            WebhookEvent::GitLab(event) => gitlab::normalize(event),
            WebhookEvent::BitbucketServer(event) => bitbucket_server::normalize(event),
            WebhookEvent::BitbucketCloud(event) => bitbucket_cloud::normalize(event),
            WebhookEvent::AzureDevOps(event) => azure_devops::normalize(event),
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("missing event type ({0})")]
    MissingEventType(&'static str),
    #[error("malformed {event_type} payload: {source}")]
    Json {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DecodeError {
    pub(crate) fn json(event_type: &str, source: serde_json::Error) -> Self {
        DecodeError::Json {
            event_type: event_type.to_string(),
            source,
        }
    }
}

#[derive(Deserialize)]
struct GitLabKindProbe {
    #[serde(default)]
    object_kind: String,
}

#[derive(Deserialize)]
struct AzureDevOpsKindProbe {
    #[serde(default, rename = "eventType")]
    event_type: String,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Determine the event type of a request for the given code host.
pub fn event_type(
    kind: CodeHostKind,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<String, DecodeError> {
    let missing = || DecodeError::MissingEventType(kind.event_type_source());
    match kind {
        CodeHostKind::GitHub => header(headers, "x-github-event")
            .map(str::to_string)
            .ok_or_else(missing),
        CodeHostKind::BitbucketServer | CodeHostKind::BitbucketCloud => {
            header(headers, "x-event-key")
                .map(str::to_string)
                .ok_or_else(missing)
        }
        CodeHostKind::GitLab => {
            let probe: GitLabKindProbe = serde_json::from_slice(body)
                .map_err(|source| DecodeError::json("gitlab", source))?;
            if !probe.object_kind.is_empty() {
                return Ok(probe.object_kind);
            }
            // Older GitLab releases only send "Merge Request Hook" style headers.
            header(headers, "x-gitlab-event")
                .map(|value| {
                    value
                        .trim_end_matches(" Hook")
                        .to_ascii_lowercase()
                        .replace(' ', "_")
                })
                .ok_or_else(missing)
        }
        CodeHostKind::AzureDevOps => {
            let probe: AzureDevOpsKindProbe = serde_json::from_slice(body)
                .map_err(|source| DecodeError::json("azuredevops", source))?;
            if probe.event_type.is_empty() {
                return Err(missing());
            }
            Ok(probe.event_type)
        }
    }
}

/// Decode a raw payload for the given code host.
pub fn decode(
    kind: CodeHostKind,
    event_type: &str,
    body: &[u8],
) -> Result<Option<WebhookEvent>, DecodeError> {
    let event = match kind {
        CodeHostKind::GitHub => github::decode(event_type, body)?.map(WebhookEvent::GitHub),
        CodeHostKind::GitLab => gitlab::decode(event_type, body)?.map(WebhookEvent::GitLab),
        CodeHostKind::BitbucketServer => {
            bitbucket_server::decode(event_type, body)?.map(WebhookEvent::BitbucketServer)
        }
        CodeHostKind::BitbucketCloud => {
            bitbucket_cloud::decode(event_type, body)?.map(WebhookEvent::BitbucketCloud)
        }
        CodeHostKind::AzureDevOps => {
            azure_devops::decode(event_type, body)?.map(WebhookEvent::AzureDevOps)
        }
    };
    Ok(event)
}

/// Event types the changeset handler subscribes to for each host.
pub fn changeset_event_types(kind: CodeHostKind) -> &'static [&'static str] {
    match kind {
        CodeHostKind::GitHub => github::EVENT_TYPES,
        CodeHostKind::GitLab => gitlab::EVENT_TYPES,
        CodeHostKind::BitbucketServer => bitbucket_server::EVENT_TYPES,
        CodeHostKind::BitbucketCloud => bitbucket_cloud::EVENT_TYPES,
        CodeHostKind::AzureDevOps => azure_devops::EVENT_TYPES,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_host_kinds_parse_case_insensitively() {
        for kind in ALL_CODE_HOST_KINDS {
            assert_eq!(parse_code_host_kind(kind.as_str()), Some(*kind));
            assert_eq!(
                parse_code_host_kind(&kind.as_str().to_ascii_lowercase()),
                Some(*kind)
            );
        }
        assert_eq!(parse_code_host_kind("GERRIT"), None);
    }

    #[test]
    fn code_host_urls_are_normalized() {
        assert_eq!(
            normalize_code_host_url("https://GitHub.com/").unwrap(),
            "https://github.com"
        );
        assert_eq!(
            normalize_code_host_url("https://bitbucket.example.com/scm/").unwrap(),
            "https://bitbucket.example.com/scm"
        );
        assert!(normalize_code_host_url("not a url").is_err());
    }

    #[test]
    fn zero_identities_are_unresolvable() {
        assert!(PrIdentity::new(12, "R_1").is_resolvable());
        assert!(!PrIdentity::new(0, "R_1").is_resolvable());
        assert!(!PrIdentity::new(12, "").is_resolvable());
    }

    #[test]
    fn gitlab_event_type_prefers_object_kind() {
        let mut headers = HeaderMap::new();
        headers.insert("x-gitlab-event", "Pipeline Hook".parse().unwrap());
        let body = br#"{"object_kind":"merge_request"}"#;
        assert_eq!(
            event_type(CodeHostKind::GitLab, &headers, body).unwrap(),
            "merge_request"
        );
        assert_eq!(
            event_type(CodeHostKind::GitLab, &headers, b"{}").unwrap(),
            "pipeline"
        );
    }

    #[test]
    fn missing_event_type_is_an_error() {
        let headers = HeaderMap::new();
        assert!(matches!(
            event_type(CodeHostKind::GitHub, &headers, b"{}"),
            Err(DecodeError::MissingEventType("X-GitHub-Event"))
        ));
        assert!(event_type(CodeHostKind::AzureDevOps, &headers, b"{}").is_err());
    }
}
