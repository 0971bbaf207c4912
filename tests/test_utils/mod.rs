//! Test utilities for database and HTTP testing.
//!
//! Provides an in-memory SQLite database with migrations applied, fixture
//! inserts for tracked repos and changesets, and a fully wired application.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use chrono::Utc;
use hookgate::{
    config::AppConfig,
    crypto::CryptoKey,
    migration::{Migrator, MigratorTrait},
    models::{changeset, repo},
    server::{AppState, build_state, create_app},
};
use sea_orm::{
    ActiveModelTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Set, Statement,
};
use tempfile::TempDir;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

pub const OPERATOR_TOKEN: &str = "test-operator-token";
pub const GITHUB_URL: &str = "https://github.com";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<Arc<DatabaseConnection>> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;

    // Fixtures reference rows in tables the gateway never writes to.
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = OFF".to_string(),
    ))
    .await?;

    Ok(Arc::new(db))
}

/// Sets up a file-backed SQLite database inside `dir` with a pool of
/// `max_connections`, for tests that need real concurrent writers.
pub async fn setup_file_db(dir: &TempDir, max_connections: u32) -> Result<Arc<DatabaseConnection>> {
    let url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("hookgate.db").display()
    );
    let mut options = ConnectOptions::new(url);
    options.max_connections(max_connections).sqlx_logging(false);
    let db = Database::connect(options).await?;
    Migrator::up(&db, None).await?;
    Ok(Arc::new(db))
}

/// Inserts a tracked repo and returns its id.
pub async fn insert_repo(
    db: &DatabaseConnection,
    external_id: &str,
    service_type: &str,
    code_host_url: &str,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    repo::ActiveModel {
        id: Set(id),
        name: Set(format!("repo-{external_id}")),
        external_id: Set(external_id.to_string()),
        service_type: Set(service_type.to_string()),
        service_id: Set(code_host_url.to_string()),
        created_at: Set(Utc::now().into()),
    }
    .insert(db)
    .await?;
    Ok(id)
}

/// Inserts a tracked changeset and returns its id.
pub async fn insert_changeset(
    db: &DatabaseConnection,
    repo_id: Uuid,
    external_id: &str,
    service_type: &str,
    branch: Option<&str>,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    changeset::ActiveModel {
        id: Set(id),
        repo_id: Set(repo_id),
        external_id: Set(external_id.to_string()),
        external_branch: Set(branch.map(str::to_string)),
        external_service_type: Set(service_type.to_string()),
        external_state: Set(Some("OPEN".to_string())),
        review_state: Set("PENDING".to_string()),
        check_state: Set("UNKNOWN".to_string()),
        synced_at: Set(None),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(db)
    .await?;
    Ok(id)
}

pub fn test_config() -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        operator_tokens: vec![OPERATOR_TOKEN.to_string()],
        webhook_logging_enabled: Some(true),
        ..Default::default()
    }
}

pub fn test_crypto_key() -> CryptoKey {
    CryptoKey::new(vec![7u8; 32]).expect("32 byte key")
}

pub async fn test_state(db: Arc<DatabaseConnection>, config: AppConfig) -> AppState {
    let crypto_key = config.crypto_key().expect("valid crypto key");
    build_state(Arc::new(config), db, crypto_key).await
}

pub async fn test_app(db: Arc<DatabaseConnection>) -> Router {
    create_app(test_state(db, test_config()).await)
}

/// Sends `request` and returns the status plus the body parsed as JSON
/// (`Value::Null` for empty bodies).
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("request handled");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, body)
}

pub fn sign(secret: &str, body: &[u8]) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("any key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

pub fn operator_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", format!("Bearer {OPERATOR_TOKEN}"));
    match body {
        Some(json) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(json.to_string()))
            .expect("valid request"),
        None => builder.body(Body::empty()).expect("valid request"),
    }
}
