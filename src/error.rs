//! # Error Handling
//!
//! Unified problem+json responses for the gateway plus the webhook error
//! taxonomy shared by validators, decoders, handlers and the upsert engine.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::changeset_events::ChangesetEventError;
use crate::crypto::CryptoError;
use crate::telemetry;
use crate::webhooks::DecodeError;

/// Message returned for every secret or signature mismatch.
pub const SHARED_SECRET_INCORRECT: &str = "shared secret is incorrect";

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

pub(crate) fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error.code().is_some_and(|code| {
        let code = code.as_ref();
        code == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code)
    })
}

/// Failures a retried transaction can get past: a lost insert race, a
/// Postgres serialization failure or deadlock, a busy or locked SQLite file.
pub(crate) fn is_transient_conflict(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const RETRYABLE_CODES: &[&str] = &["40001", "40P01", "5", "6", "517"];

    if is_unique_violation(error) {
        return true;
    }

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Conn(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    db_error
        .code()
        .is_some_and(|code| RETRYABLE_CODES.contains(&code.as_ref()))
        || db_error.message().contains("database is locked")
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(?error, "Unique constraint violation detected");
            return Self::new(StatusCode::CONFLICT, "CONFLICT", "Resource already exists");
        }

        match error {
            sea_orm::DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("Record not found: {}", record),
            ),
            sea_orm::DbErr::Conn(connection_err) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            _ => {
                tracing::error!("Database error: {:?}", error);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create a not found error (404)
pub fn not_found(message: &str) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}

/// Failures raised while accepting and applying a webhook.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Signature or shared secret mismatch.
    #[error("{0}")]
    Authentication(String),
    /// Body, headers or path could not be understood.
    #[error("malformed request: {0}")]
    Malformed(String),
    /// Registration (or other addressed resource) does not exist.
    #[error("{0}")]
    UnknownResource(String),
    /// Registration names a code host kind this gateway does not implement.
    #[error("unsupported code host kind {0:?}")]
    UnsupportedHost(String),
    #[error("store error: {0}")]
    Store(#[from] sea_orm::DbErr),
    /// Internal contract broken, e.g. metadata that does not fit its kind.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    /// Stored secret could not be decrypted or loaded.
    #[error("secret unavailable: {0}")]
    Secret(String),
    /// Several targets of one event failed independently.
    #[error("{} targets failed: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<WebhookError>),
}

fn join_errors(errors: &[WebhookError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl WebhookError {
    pub fn authentication() -> Self {
        WebhookError::Authentication(SHARED_SECRET_INCORRECT.to_string())
    }

    /// Collapse per-target failures: nothing, the single error, or an aggregate.
    pub fn aggregate(mut errors: Vec<WebhookError>) -> Option<WebhookError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(WebhookError::Aggregate(errors)),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::Authentication(_) => StatusCode::UNAUTHORIZED,
            WebhookError::Malformed(_) => StatusCode::BAD_REQUEST,
            WebhookError::UnknownResource(_) => StatusCode::NOT_FOUND,
            WebhookError::UnsupportedHost(_) => StatusCode::NOT_IMPLEMENTED,
            WebhookError::Store(_)
            | WebhookError::InvariantViolation(_)
            | WebhookError::Secret(_) => StatusCode::INTERNAL_SERVER_ERROR,
            WebhookError::Aggregate(errors) => errors
                .iter()
                .map(WebhookError::status_code)
                .max()
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            WebhookError::Authentication(_) => "UNAUTHORIZED",
            WebhookError::Malformed(_) => "VALIDATION_FAILED",
            WebhookError::UnknownResource(_) => "NOT_FOUND",
            WebhookError::UnsupportedHost(_) => "NOT_IMPLEMENTED",
            WebhookError::Store(_) => "STORE_ERROR",
            WebhookError::InvariantViolation(_) => "INVARIANT_VIOLATION",
            WebhookError::Secret(_) => "SECRET_UNAVAILABLE",
            WebhookError::Aggregate(_) => "HANDLER_FAILED",
        }
    }
}

impl From<DecodeError> for WebhookError {
    fn from(error: DecodeError) -> Self {
        WebhookError::Malformed(error.to_string())
    }
}

impl From<ChangesetEventError> for WebhookError {
    fn from(error: ChangesetEventError) -> Self {
        WebhookError::InvariantViolation(error.to_string())
    }
}

impl From<CryptoError> for WebhookError {
    fn from(error: CryptoError) -> Self {
        WebhookError::Secret(error.to_string())
    }
}

impl From<WebhookError> for ApiError {
    fn from(error: WebhookError) -> Self {
        let status = error.status_code();
        if status.is_server_error() {
            tracing::error!(error = %error, "Webhook processing failed");
            // Store and crypto details stay in the logs.
            return ApiError::new(status, error.error_code(), "webhook processing failed");
        }
        ApiError::new(status, error.error_code(), &error.to_string())
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_api_error_basic() {
        let error = ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "Test error message",
        );

        assert_eq!(error.code, Box::from("VALIDATION_FAILED"));
        assert_eq!(error.message, Box::from("Test error message"));
        assert_eq!(error.details, None);
    }

    #[test]
    fn test_content_type_header() {
        let error = ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", "Test error");
        let response = error.into_response();

        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }

    #[test]
    fn test_trace_id_generation() {
        let error = ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "X", "Test error");
        let trace_id = error.trace_id.unwrap();
        assert!(trace_id.starts_with("corr-"));
        assert_eq!(trace_id.len(), 13);
    }

    #[test]
    fn test_database_error_mapping() {
        let api_error: ApiError = sea_orm::DbErr::RecordNotFound("registration".into()).into();
        assert_eq!(api_error.status, StatusCode::NOT_FOUND);
        assert!(api_error.message.contains("registration"));
    }

    #[test]
    fn test_validation_error_with_details() {
        let error = validation_error("Validation failed", json!({"url": "invalid"}));
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.details, Some(Box::new(json!({"url": "invalid"}))));
    }

    #[test]
    fn webhook_errors_map_to_http_contract() {
        let cases = [
            (WebhookError::authentication(), StatusCode::UNAUTHORIZED),
            (WebhookError::Malformed("x".into()), StatusCode::BAD_REQUEST),
            (WebhookError::UnknownResource("x".into()), StatusCode::NOT_FOUND),
            (
                WebhookError::UnsupportedHost("GERRIT".into()),
                StatusCode::NOT_IMPLEMENTED,
            ),
            (
                WebhookError::Secret("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                WebhookError::InvariantViolation("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }

    #[test]
    fn authentication_message_is_stable() {
        let api: ApiError = WebhookError::authentication().into();
        assert_eq!(api.message.as_ref(), SHARED_SECRET_INCORRECT);
    }

    #[test]
    fn aggregate_collapses_single_error() {
        assert!(WebhookError::aggregate(Vec::new()).is_none());
        let single = WebhookError::aggregate(vec![WebhookError::Malformed("a".into())]).unwrap();
        assert!(matches!(single, WebhookError::Malformed(_)));
        let many = WebhookError::aggregate(vec![
            WebhookError::Malformed("a".into()),
            WebhookError::InvariantViolation("b".into()),
        ])
        .unwrap();
        assert_eq!(many.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(many.to_string().starts_with("2 targets failed"));
    }
}
