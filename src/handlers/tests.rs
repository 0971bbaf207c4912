use std::sync::Arc;

use axum::{
    body::{Body, to_bytes},
    extract::State,
    http::{Request, StatusCode},
};
use sea_orm::{Database, DatabaseConnection};
use tower::ServiceExt;

use crate::config::AppConfig;
use crate::handlers::{healthz, root};
use crate::server::{AppState, build_state, create_app};

async fn memory_db() -> DatabaseConnection {
    Database::connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite")
}

async fn state_with(db: DatabaseConnection) -> AppState {
    let config = AppConfig {
        operator_tokens: vec!["token".to_string()],
        ..AppConfig::default()
    };
    build_state(Arc::new(config), Arc::new(db), None).await
}

#[tokio::test]
async fn root_reports_service_name_and_version() {
    let info = root().await.0;
    assert_eq!(info.service, "hookgate");
    assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn healthz_is_ok_when_database_answers() {
    let state = state_with(memory_db().await).await;
    let (status, body) = healthz(State(state)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.0.status, "ok");
}

#[tokio::test]
async fn healthz_is_unavailable_after_pool_closes() {
    let db = memory_db().await;
    let state = state_with(db.clone()).await;
    db.close().await.expect("pool closes");

    let (status, body) = healthz(State(state)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body.0.status, "unavailable");
}

#[tokio::test]
async fn admin_routes_reject_missing_bearer() {
    let app = create_app(state_with(memory_db().await).await);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/webhook-registrations")
                .header("Content-Type", "application/json")
                .body(Body::from(r#"{"kind":"GITHUB","url":"https://github.com"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers()["content-type"],
        "application/problem+json"
    );
}

#[tokio::test]
async fn openapi_document_lists_every_route() {
    let app = create_app(state_with(memory_db().await).await);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    for path in [
        "/",
        "/healthz",
        "/webhooks/{id}",
        "/.api/github-webhooks",
        "/.api/bitbucket-cloud-webhooks",
        "/admin/webhook-registrations",
        "/admin/webhook-registrations/{id}",
        "/admin/webhook-registrations/{id}/secret",
        "/admin/webhook-logs",
    ] {
        assert!(doc["paths"][path].is_object(), "missing {path}");
    }
    assert_eq!(
        doc["components"]["securitySchemes"]["bearer_auth"]["scheme"],
        "bearer"
    );
}
