//! # Webhook Handlers
//!
//! Public delivery endpoints. A delivery is attributed to a registration,
//! authenticated with that registration's secret, decoded and dispatched
//! through the [`WebhookRouter`](crate::webhooks::WebhookRouter).

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{ApiError, WebhookError};
use crate::models::webhook_registration;
use crate::repositories::{CodeHostRepository, WebhookRegistrationRepository};
use crate::server::AppState;
use crate::webhook_logging::RequestDiagnostics;
use crate::webhook_verification::{
    self, SECRET_QUERY_PARAM, SecretSet, SignedRequest, verify_signed_body,
};
use crate::webhooks::{self, CodeHostKind, DispatchContext, parse_code_host_kind};

/// Body of a 200 response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAcceptResponse {
    /// Always `processed`
    pub status: String,
    /// Number of handlers that ran
    pub handlers: usize,
}

/// Deliveries addressed by registration id.
#[utoipa::path(
    post,
    path = "/webhooks/{id}",
    params(
        ("id" = String, Path, description = "Webhook registration external id (UUID)"),
        ("X-Hub-Signature-256" = Option<String>, Header, description = "GitHub / Bitbucket Server HMAC-SHA256 signature"),
        ("X-Gitlab-Token" = Option<String>, Header, description = "GitLab shared secret"),
        ("secret" = Option<String>, Query, description = "Bitbucket Cloud shared secret"),
    ),
    request_body(content = Object, description = "Code host webhook payload", content_type = "application/json"),
    responses(
        (status = 200, description = "Event handled", body = WebhookAcceptResponse),
        (status = 204, description = "Event recognized, nothing to do"),
        (status = 400, description = "Malformed id, headers or payload", body = ApiError),
        (status = 401, description = "Shared secret is incorrect", body = ApiError),
        (status = 404, description = "Registration not found", body = ApiError),
        (status = 500, description = "Internal failure", body = ApiError),
        (status = 501, description = "Code host kind not implemented", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
    diagnostics: RequestDiagnostics,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Result<Response, WebhookError> {
    let external_id = Uuid::parse_str(&id)
        .map_err(|_| WebhookError::Malformed(format!("invalid webhook id {id:?}")))?;

    let registrations = registration_repo(&state);
    let registration = registrations
        .find_by_external_id(external_id)
        .await?
        .ok_or_else(|| WebhookError::UnknownResource(format!("webhook {external_id} not found")))?;

    let query_secret = query_param(&uri, SECRET_QUERY_PARAM);
    process_delivery(
        &state,
        &diagnostics,
        &registration,
        &headers,
        query_secret.as_deref(),
        &body,
    )
    .await
}

/// Deliveries from GitHub apps configured before registrations existed. The
/// registration is the one whose secret produced the signature.
#[utoipa::path(
    post,
    path = "/.api/github-webhooks",
    params(
        ("X-Hub-Signature-256" = Option<String>, Header, description = "HMAC-SHA256 signature"),
    ),
    request_body(content = Object, description = "GitHub webhook payload", content_type = "application/json"),
    responses(
        (status = 200, description = "Event handled", body = WebhookAcceptResponse),
        (status = 204, description = "Event recognized, nothing to do"),
        (status = 401, description = "No registration secret matches the signature", body = ApiError),
        (status = 500, description = "Internal failure", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn receive_legacy_github_webhook(
    State(state): State<AppState>,
    diagnostics: RequestDiagnostics,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, WebhookError> {
    let registrations = registration_repo(&state);
    let candidates = registrations.list_by_kind(CodeHostKind::GitHub).await?;
    let event_type = header_str(&headers, "x-github-event").unwrap_or_default();
    let request = SignedRequest {
        event_type: &event_type,
        headers: &headers,
        query_secret: None,
        body: &body,
    };

    for candidate in &candidates {
        let Some(secret) = registrations.secret_of(candidate)? else {
            continue;
        };
        if verify_signed_body(&request, Some(&secret)).is_ok() {
            debug!(registration = %candidate.external_id, "Matched legacy GitHub delivery");
            return process_delivery(&state, &diagnostics, candidate, &headers, None, &body).await;
        }
    }

    warn!(candidates = candidates.len(), "No GitHub registration matches delivery signature");
    counter!("webhook_requests_total", "code_host" => "GITHUB", "outcome" => "unauthorized")
        .increment(1);
    Err(WebhookError::authentication())
}

/// Deliveries from Bitbucket Cloud webhooks configured before registrations
/// existed. An `id` query parameter selects the registration; without it the
/// `secret` parameter must match some Bitbucket Cloud registration.
#[utoipa::path(
    post,
    path = "/.api/bitbucket-cloud-webhooks",
    params(
        ("id" = Option<String>, Query, description = "Webhook registration external id"),
        ("secret" = Option<String>, Query, description = "Shared secret"),
    ),
    request_body(content = Object, description = "Bitbucket Cloud webhook payload", content_type = "application/json"),
    responses(
        (status = 200, description = "Event handled", body = WebhookAcceptResponse),
        (status = 204, description = "Event recognized, nothing to do"),
        (status = 400, description = "Malformed id or payload", body = ApiError),
        (status = 401, description = "Shared secret is incorrect", body = ApiError),
        (status = 404, description = "Registration not found", body = ApiError),
        (status = 500, description = "Internal failure", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn receive_legacy_bitbucket_cloud_webhook(
    State(state): State<AppState>,
    diagnostics: RequestDiagnostics,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Result<Response, WebhookError> {
    let registrations = registration_repo(&state);
    let query_secret = query_param(&uri, SECRET_QUERY_PARAM);

    if let Some(id) = query_param(&uri, "id") {
        let external_id = Uuid::parse_str(&id)
            .map_err(|_| WebhookError::Malformed(format!("invalid webhook id {id:?}")))?;
        let registration = registrations
            .find_by_external_id(external_id)
            .await?
            .filter(|registration| registration.code_host_kind == CodeHostKind::BitbucketCloud.as_str())
            .ok_or_else(|| {
                WebhookError::UnknownResource(format!("webhook {external_id} not found"))
            })?;
        return process_delivery(
            &state,
            &diagnostics,
            &registration,
            &headers,
            query_secret.as_deref(),
            &body,
        )
        .await;
    }

    let Some(provided) = query_secret else {
        return Err(WebhookError::authentication());
    };
    let candidates = registrations.list_by_kind(CodeHostKind::BitbucketCloud).await?;
    for candidate in &candidates {
        let Some(secret) = registrations.secret_of(candidate)? else {
            continue;
        };
        if webhook_verification::verify_query_secret(Some(&provided), std::slice::from_ref(&secret))
            .is_ok()
        {
            return process_delivery(
                &state,
                &diagnostics,
                candidate,
                &headers,
                Some(&provided),
                &body,
            )
            .await;
        }
    }

    warn!(candidates = candidates.len(), "No Bitbucket Cloud registration matches delivery secret");
    Err(WebhookError::authentication())
}

/// Authenticate, decode and dispatch one delivery for a known registration.
async fn process_delivery(
    state: &AppState,
    diagnostics: &RequestDiagnostics,
    registration: &webhook_registration::Model,
    headers: &HeaderMap,
    query_secret: Option<&str>,
    body: &[u8],
) -> Result<Response, WebhookError> {
    diagnostics.set_registration(registration.id);

    let kind = parse_code_host_kind(&registration.code_host_kind)
        .ok_or_else(|| WebhookError::UnsupportedHost(registration.code_host_kind.clone()))?;

    // Unauthenticated deliveries may reference a known code host but never create one.
    let code_hosts = CodeHostRepository::new(state.db.clone());
    if let Some(code_host) = code_hosts.find(kind, &registration.code_host_url).await? {
        diagnostics.set_code_host(code_host.id);
    }

    let registrations = registration_repo(state);
    let own_secret = registrations.secret_of(registration)?;
    let peer_secrets = if kind == CodeHostKind::BitbucketCloud {
        let mut secrets = Vec::new();
        for peer in registrations
            .list_for_code_host(kind, &registration.code_host_url)
            .await?
        {
            if let Some(secret) = registrations.secret_of(&peer)? {
                secrets.push(secret);
            }
        }
        secrets
    } else {
        Vec::new()
    };

    // Missing event types are reported after authentication.
    let event_type = webhooks::event_type(kind, headers, body);
    let request = SignedRequest {
        event_type: event_type.as_deref().unwrap_or_default(),
        headers,
        query_secret,
        body,
    };
    let secrets = SecretSet {
        own: own_secret.as_deref(),
        peers: &peer_secrets,
    };
    if let Err(err) = webhook_verification::validate(kind, &request, secrets) {
        warn!(
            registration = %registration.external_id,
            code_host = %kind,
            error = %err,
            "Webhook secret validation failed"
        );
        counter!("webhook_requests_total", "code_host" => kind.as_str(), "outcome" => "unauthorized")
            .increment(1);
        return Err(WebhookError::authentication());
    }

    let code_host = code_hosts.ensure(kind, &registration.code_host_url).await?;
    diagnostics.set_code_host(code_host.id);

    let event_type = event_type?;
    let Some(event) = webhooks::decode(kind, &event_type, body)? else {
        debug!(code_host = %kind, %event_type, "Ignoring unrecognized webhook event");
        counter!("webhook_requests_total", "code_host" => kind.as_str(), "outcome" => "ignored")
            .increment(1);
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    let ctx = DispatchContext {
        kind,
        code_host_url: registration.code_host_url.clone(),
        event_type: event_type.clone(),
    };
    let outcome = state.router.dispatch(ctx, Arc::new(event)).await?;

    counter!("webhook_requests_total", "code_host" => kind.as_str(), "outcome" => "processed")
        .increment(1);
    if outcome.handled == 0 {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    info!(
        registration = %registration.external_id,
        code_host = %kind,
        %event_type,
        handlers = outcome.handled,
        "Webhook processed"
    );
    Ok((
        StatusCode::OK,
        Json(WebhookAcceptResponse {
            status: "processed".to_string(),
            handlers: outcome.handled,
        }),
    )
        .into_response())
}

fn registration_repo(state: &AppState) -> WebhookRegistrationRepository {
    WebhookRegistrationRepository::new(state.db.clone(), state.crypto_key.clone())
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn query_param(uri: &Uri, name: &str) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}
