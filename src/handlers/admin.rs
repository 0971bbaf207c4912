//! # Administration Handlers
//!
//! Operator-only management of webhook registrations and inspection of
//! captured diagnostic logs. Secrets are accepted here but never returned,
//! except once when the gateway generates one.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::crypto::generate_secret;
use crate::error::{ApiError, not_found, validation_error};
use crate::models::{webhook_log, webhook_registration};
use crate::repositories::{WebhookLogRepository, WebhookRegistrationRepository};
use crate::server::AppState;
use crate::webhooks::{CodeHostKind, normalize_code_host_url, parse_code_host_kind};

const DEFAULT_LOG_LIMIT: u64 = 50;
const MAX_LOG_LIMIT: u64 = 500;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRegistrationRequest {
    /// GITHUB, GITLAB, BITBUCKETSERVER, BITBUCKETCLOUD or AZUREDEVOPS
    #[schema(example = "GITHUB")]
    pub kind: String,
    /// Base URL of the code host
    #[schema(example = "https://github.com")]
    pub url: String,
    /// Shared secret. Generated when omitted (except for Azure DevOps, which
    /// does not sign deliveries).
    pub secret: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegistrationResponse {
    /// External id used in the webhook URL
    pub id: Uuid,
    pub kind: String,
    pub url: String,
    /// Path the code host should deliver to
    #[schema(example = "/webhooks/550e8400-e29b-41d4-a716-446655440000")]
    pub webhook_path: String,
    pub has_secret: bool,
    /// Present only when the gateway generated the secret
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_secret: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RegistrationResponse {
    fn from_model(model: &webhook_registration::Model) -> Self {
        Self {
            id: model.external_id,
            kind: model.code_host_kind.clone(),
            url: model.code_host_url.clone(),
            webhook_path: format!("/webhooks/{}", model.external_id),
            has_secret: model.secret_ciphertext.is_some(),
            generated_secret: None,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegistrationListResponse {
    pub registrations: Vec<RegistrationResponse>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RotateSecretRequest {
    /// New secret; `null` removes the secret
    pub secret: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WebhookLogQuery {
    /// Restrict to one registration (external id)
    pub registration_id: Option<Uuid>,
    /// Maximum number of records (default 50, max 500)
    pub limit: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookLogResponse {
    pub id: Uuid,
    /// External id of the registration the delivery was attributed to
    pub registration_id: Option<Uuid>,
    pub code_host_id: Option<Uuid>,
    pub status_code: i32,
    #[schema(value_type = Object)]
    pub request: JsonValue,
    #[schema(value_type = Object)]
    pub response: JsonValue,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookLogListResponse {
    pub logs: Vec<WebhookLogResponse>,
}

fn registrations(state: &AppState) -> WebhookRegistrationRepository {
    WebhookRegistrationRepository::new(state.db.clone(), state.crypto_key.clone())
}

fn parse_registration_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| {
        validation_error(
            "Invalid registration id",
            serde_json::json!({ "id": "Must be a valid UUID" }),
        )
    })
}

/// Create a webhook registration
#[utoipa::path(
    post,
    path = "/admin/webhook-registrations",
    security(("bearer_auth" = [])),
    request_body = CreateRegistrationRequest,
    responses(
        (status = 201, description = "Registration created", body = RegistrationResponse),
        (status = 400, description = "Unknown kind or invalid URL", body = ApiError),
        (status = 401, description = "Missing or invalid operator token", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn create_registration(
    State(state): State<AppState>,
    _operator: OperatorAuth,
    Json(body): Json<CreateRegistrationRequest>,
) -> Result<(StatusCode, Json<RegistrationResponse>), ApiError> {
    let kind = parse_code_host_kind(&body.kind).ok_or_else(|| {
        validation_error(
            "Unsupported code host kind",
            serde_json::json!({ "kind": format!("unknown kind {:?}", body.kind) }),
        )
    })?;
    let url = normalize_code_host_url(&body.url).map_err(|err| {
        validation_error(
            "Invalid code host URL",
            serde_json::json!({ "url": err.to_string() }),
        )
    })?;

    let provided = body.secret.filter(|secret| !secret.trim().is_empty());
    let generated = match (&provided, kind) {
        (None, CodeHostKind::AzureDevOps) | (Some(_), _) => None,
        (None, _) => Some(generate_secret()),
    };
    let secret = provided.as_deref().or(generated.as_deref());

    let model = registrations(&state).create(kind, &url, secret).await?;
    info!(registration = %model.external_id, code_host = %kind, url = %url, "Webhook registration created");

    let mut response = RegistrationResponse::from_model(&model);
    response.generated_secret = generated;
    Ok((StatusCode::CREATED, Json(response)))
}

/// List webhook registrations
#[utoipa::path(
    get,
    path = "/admin/webhook-registrations",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "All registrations, newest first", body = RegistrationListResponse),
        (status = 401, description = "Missing or invalid operator token", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn list_registrations(
    State(state): State<AppState>,
    _operator: OperatorAuth,
) -> Result<Json<RegistrationListResponse>, ApiError> {
    let models = registrations(&state).list_all().await?;
    Ok(Json(RegistrationListResponse {
        registrations: models.iter().map(RegistrationResponse::from_model).collect(),
    }))
}

/// Rotate (or clear) a registration's secret
#[utoipa::path(
    put,
    path = "/admin/webhook-registrations/{id}/secret",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Registration external id")),
    request_body = RotateSecretRequest,
    responses(
        (status = 200, description = "Secret rotated", body = RegistrationResponse),
        (status = 400, description = "Invalid id", body = ApiError),
        (status = 401, description = "Missing or invalid operator token", body = ApiError),
        (status = 404, description = "Registration not found", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn rotate_secret(
    State(state): State<AppState>,
    _operator: OperatorAuth,
    Path(id): Path<String>,
    Json(body): Json<RotateSecretRequest>,
) -> Result<Json<RegistrationResponse>, ApiError> {
    let external_id = parse_registration_id(&id)?;
    let secret = body.secret.as_deref().filter(|secret| !secret.trim().is_empty());
    let model = registrations(&state)
        .rotate_secret(external_id, secret)
        .await?
        .ok_or_else(|| not_found(&format!("webhook registration {external_id} not found")))?;
    info!(registration = %external_id, has_secret = secret.is_some(), "Webhook secret rotated");
    Ok(Json(RegistrationResponse::from_model(&model)))
}

/// Delete a registration
#[utoipa::path(
    delete,
    path = "/admin/webhook-registrations/{id}",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Registration external id")),
    responses(
        (status = 204, description = "Registration deleted"),
        (status = 400, description = "Invalid id", body = ApiError),
        (status = 401, description = "Missing or invalid operator token", body = ApiError),
        (status = 404, description = "Registration not found", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn delete_registration(
    State(state): State<AppState>,
    _operator: OperatorAuth,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let external_id = parse_registration_id(&id)?;
    if !registrations(&state).delete(external_id).await? {
        return Err(not_found(&format!(
            "webhook registration {external_id} not found"
        )));
    }
    info!(registration = %external_id, "Webhook registration deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Inspect captured webhook deliveries
#[utoipa::path(
    get,
    path = "/admin/webhook-logs",
    security(("bearer_auth" = [])),
    params(WebhookLogQuery),
    responses(
        (status = 200, description = "Captured deliveries, newest first", body = WebhookLogListResponse),
        (status = 401, description = "Missing or invalid operator token", body = ApiError),
        (status = 404, description = "Registration not found", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn list_webhook_logs(
    State(state): State<AppState>,
    _operator: OperatorAuth,
    Query(query): Query<WebhookLogQuery>,
) -> Result<Json<WebhookLogListResponse>, ApiError> {
    let registrations = registrations(&state);
    let all = registrations.list_all().await?;
    let external_ids: HashMap<Uuid, Uuid> = all
        .iter()
        .map(|registration| (registration.id, registration.external_id))
        .collect();

    let registration_row = match query.registration_id {
        Some(external_id) => Some(
            all.iter()
                .find(|registration| registration.external_id == external_id)
                .map(|registration| registration.id)
                .ok_or_else(|| {
                    not_found(&format!("webhook registration {external_id} not found"))
                })?,
        ),
        None => None,
    };

    let limit = query
        .limit
        .unwrap_or(DEFAULT_LOG_LIMIT)
        .clamp(1, MAX_LOG_LIMIT);
    let logs = WebhookLogRepository::new(state.db.clone())
        .list(registration_row, limit)
        .await?;

    Ok(Json(WebhookLogListResponse {
        logs: logs
            .into_iter()
            .map(|log| log_response(log, &external_ids))
            .collect(),
    }))
}

fn log_response(log: webhook_log::Model, external_ids: &HashMap<Uuid, Uuid>) -> WebhookLogResponse {
    WebhookLogResponse {
        id: log.id,
        registration_id: log
            .webhook_registration_id
            .and_then(|row_id| external_ids.get(&row_id).copied()),
        code_host_id: log.code_host_id,
        status_code: log.status_code,
        request: log.request,
        response: log.response,
        received_at: log.received_at.with_timezone(&Utc),
    }
}
