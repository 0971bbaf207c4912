//! GitLab webhook payloads (`object_kind`).

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

use super::{DecodeError, Normalization, PrIdentity, Targets};
use crate::changeset_events::metadata::{GitLabPipeline, GitLabStateChange};
use crate::changeset_events::{ChangesetEventKind, Metadata, NormalizedEvent};

pub const EVENT_TYPES: &[&str] = &["merge_request", "pipeline"];

/// GitLab has sent both RFC 3339 and `2006-01-02 15:04:05 UTC` timestamps
/// across releases.
fn timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw.filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }
    if let Ok(parsed) = DateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S %z") {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S UTC")
        .map(|naive| Some(naive.and_utc()))
        .map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct User {
    pub username: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Project {
    pub id: i64,
    pub web_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MergeRequestAttributes {
    pub iid: i64,
    pub action: String,
    pub state: String,
    #[serde(deserialize_with = "timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MergeRequestPayload {
    pub user: User,
    pub project: Project,
    pub object_attributes: MergeRequestAttributes,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineAttributes {
    pub id: i64,
    pub status: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
    #[serde(deserialize_with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "timestamp")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MergeRequestRef {
    pub iid: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelinePayload {
    pub object_attributes: PipelineAttributes,
    pub merge_request: Option<MergeRequestRef>,
    pub project: Project,
}

#[derive(Debug, Clone)]
pub enum GitLabEvent {
    MergeRequest(MergeRequestPayload),
    Pipeline(PipelinePayload),
}

pub fn decode(event_type: &str, body: &[u8]) -> Result<Option<GitLabEvent>, DecodeError> {
    let json = |source| DecodeError::json(event_type, source);
    let event = match event_type {
        "merge_request" => GitLabEvent::MergeRequest(serde_json::from_slice(body).map_err(json)?),
        "pipeline" => GitLabEvent::Pipeline(serde_json::from_slice(body).map_err(json)?),
        _ => return Ok(None),
    };
    Ok(Some(event))
}

pub fn normalize(event: &GitLabEvent) -> Normalization {
    match event {
        GitLabEvent::MergeRequest(payload) => {
            let attrs = &payload.object_attributes;
            let identity = PrIdentity::new(attrs.iid, payload.project.id.to_string());
            let kind = match attrs.action.as_str() {
                // Approval payloads do not say who approved or what the
                // resulting approval state is.
                "approved" | "unapproved" | "update" => return Normalization::Resync(identity),
                "close" => ChangesetEventKind::GitLabClosed,
                "merge" => ChangesetEventKind::GitLabMerged,
                "reopen" => ChangesetEventKind::GitLabReopened,
                _ => return Normalization::Skip,
            };
            let key = attrs
                .updated_at
                .and_then(|at| at.timestamp_nanos_opt())
                .unwrap_or_default()
                .to_string();
            Normalization::Upsert {
                targets: Targets::Pulls(vec![identity]),
                event: NormalizedEvent::new(
                    kind,
                    key,
                    Metadata::GitLabStateChange(GitLabStateChange {
                        actor: payload.user.username.clone(),
                        updated_at: attrs.updated_at,
                    }),
                ),
            }
        }
        GitLabEvent::Pipeline(payload) => {
            // Branch and tag pipelines carry no merge request.
            let Some(merge_request) = &payload.merge_request else {
                return Normalization::Skip;
            };
            let attrs = &payload.object_attributes;
            Normalization::Upsert {
                targets: Targets::Pulls(vec![PrIdentity::new(
                    merge_request.iid,
                    payload.project.id.to_string(),
                )]),
                event: NormalizedEvent::new(
                    ChangesetEventKind::GitLabPipeline,
                    attrs.id.to_string(),
                    Metadata::GitLabPipeline(GitLabPipeline {
                        id: attrs.id,
                        status: attrs.status.clone(),
                        git_ref: attrs.git_ref.clone(),
                        sha: attrs.sha.clone(),
                        web_url: format!("{}/-/pipelines/{}", payload.project.web_url, attrs.id),
                        created_at: attrs.created_at,
                        updated_at: attrs.finished_at.or(attrs.created_at),
                    }),
                ),
            }
        }
    }
}
