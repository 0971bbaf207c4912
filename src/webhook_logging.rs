//! # Diagnostic Webhook Logging
//!
//! Middleware that captures each webhook delivery (request and response) into
//! `webhook_logs`. Handlers attribute the delivery to a registration and code
//! host through the request-scoped [`RequestDiagnostics`] value.

use std::convert::Infallible;
use std::sync::{Arc, OnceLock};

use axum::{
    body::{Body, Bytes},
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, StatusCode, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use metrics::counter;
use serde_json::{Map, Value, json};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::repositories::webhook_log::{NewWebhookLog, WebhookLogRepository};
use crate::webhook_verification::{
    GITLAB_TOKEN_HEADER, SECRET_QUERY_PARAM, SIGNATURE_256_HEADER, SIGNATURE_HEADER,
};

const REDACTED: &str = "[REDACTED]";

const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "proxy-authorization",
    SIGNATURE_256_HEADER,
    SIGNATURE_HEADER,
    GITLAB_TOKEN_HEADER,
];

/// Attribution for one delivery, filled in by handlers as they learn it.
///
/// Each value can be set once; later calls are ignored.
#[derive(Debug, Clone, Default)]
pub struct RequestDiagnostics {
    inner: Arc<DiagnosticsInner>,
}

#[derive(Debug, Default)]
struct DiagnosticsInner {
    registration_id: OnceLock<Uuid>,
    code_host_id: OnceLock<Uuid>,
}

impl RequestDiagnostics {
    pub fn set_registration(&self, id: Uuid) {
        let _ = self.inner.registration_id.set(id);
    }

    pub fn set_code_host(&self, id: Uuid) {
        let _ = self.inner.code_host_id.set(id);
    }

    pub fn registration_id(&self) -> Option<Uuid> {
        self.inner.registration_id.get().copied()
    }

    pub fn code_host_id(&self) -> Option<Uuid> {
        self.inner.code_host_id.get().copied()
    }
}

/// Outside the logging middleware the extractor yields a detached value, so
/// handlers can set attribution unconditionally.
impl<S> FromRequestParts<S> for RequestDiagnostics
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestDiagnostics>()
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone)]
pub struct WebhookLogState {
    pub repo: WebhookLogRepository,
    pub enabled: bool,
    pub max_body_bytes: usize,
}

/// Capture the delivery when logging is enabled; otherwise pass through.
pub async fn webhook_log_middleware(
    State(state): State<WebhookLogState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.enabled {
        return next.run(request).await;
    }

    let received_at = Utc::now();
    let (mut parts, body) = request.into_parts();
    let body_bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "Failed to buffer webhook request body");
            return ApiError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                "PAYLOAD_TOO_LARGE",
                "request body exceeds the configured limit",
            )
            .into_response();
        }
    };

    let diagnostics = RequestDiagnostics::default();
    parts.extensions.insert(diagnostics.clone());

    let request_snapshot = json!({
        "method": parts.method.as_str(),
        "url": redact_url(&parts.uri),
        "version": format!("{:?}", parts.version),
        "headers": headers_snapshot(&parts.headers),
        "body": body_snapshot(&body_bytes),
    });

    let request = Request::from_parts(parts, Body::from(body_bytes));
    let response = next.run(request).await;

    let (response_parts, body) = response.into_parts();
    let response_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(error = %err, "Failed to buffer webhook response body");
            Bytes::new()
        }
    };
    let status_code = response_parts.status.as_u16();
    let response_snapshot = json!({
        "status_code": status_code,
        "headers": headers_snapshot(&response_parts.headers),
        "body": body_snapshot(&response_bytes),
    });

    let record = NewWebhookLog {
        webhook_registration_id: diagnostics.registration_id(),
        code_host_id: diagnostics.code_host_id(),
        status_code,
        request: request_snapshot,
        response: response_snapshot,
        received_at,
    };
    match state.repo.insert(record).await {
        Ok(saved) => debug!(log_id = %saved.id, status_code, "Webhook delivery logged"),
        Err(err) => {
            counter!("webhook_log_write_failures_total").increment(1);
            error!(error = %err, "Failed to persist webhook log");
        }
    }

    Response::from_parts(response_parts, Body::from(response_bytes))
}

fn headers_snapshot(headers: &HeaderMap) -> Value {
    let mut map = Map::new();
    for (name, value) in headers {
        let rendered = if SENSITIVE_HEADERS.contains(&name.as_str()) {
            REDACTED.to_string()
        } else {
            String::from_utf8_lossy(value.as_bytes()).into_owned()
        };
        match map.get_mut(name.as_str()) {
            Some(Value::Array(values)) => values.push(Value::String(rendered)),
            _ => {
                map.insert(
                    name.as_str().to_string(),
                    Value::Array(vec![Value::String(rendered)]),
                );
            }
        }
    }
    Value::Object(map)
}

/// Bodies are stored as JSON when they parse, as text otherwise.
fn body_snapshot(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

fn redact_url(uri: &axum::http::Uri) -> String {
    let Some(query) = uri.query() else {
        return uri.to_string();
    };
    let redacted: Vec<String> = url::form_urlencoded::parse(query.as_bytes())
        .map(|(key, value)| {
            let value = if key == SECRET_QUERY_PARAM {
                REDACTED.into()
            } else {
                value
            };
            url::form_urlencoded::Serializer::new(String::new())
                .append_pair(&key, &value)
                .finish()
        })
        .collect();
    format!("{}?{}", uri.path(), redacted.join("&"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensitive_headers_are_redacted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-hub-signature-256", "sha256=abc".parse().unwrap());
        headers.insert("x-github-event", "push".parse().unwrap());
        let snapshot = headers_snapshot(&headers);
        assert_eq!(snapshot["x-hub-signature-256"][0], REDACTED);
        assert_eq!(snapshot["x-github-event"][0], "push");
    }

    #[test]
    fn secret_query_parameter_is_redacted() {
        let uri: axum::http::Uri = "/webhooks/abc?secret=hunter2&id=1".parse().unwrap();
        let rendered = redact_url(&uri);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("id=1"));
        assert!(rendered.starts_with("/webhooks/abc?"));
    }

    #[test]
    fn non_json_bodies_are_kept_as_text() {
        assert_eq!(body_snapshot(b"{\"a\":1}"), json!({"a": 1}));
        assert_eq!(body_snapshot(b"not json"), json!("not json"));
        assert_eq!(body_snapshot(b""), Value::Null);
    }

    #[test]
    fn diagnostics_values_are_set_once() {
        let diagnostics = RequestDiagnostics::default();
        let first = Uuid::new_v4();
        diagnostics.set_registration(first);
        diagnostics.set_registration(Uuid::new_v4());
        assert_eq!(diagnostics.registration_id(), Some(first));
        assert_eq!(diagnostics.code_host_id(), None);
    }
}
