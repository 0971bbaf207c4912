//! # Server Configuration
//!
//! Router assembly, shared state and the process lifecycle: migrations, the
//! retention purger, configuration reload on SIGHUP and graceful shutdown.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
};
use migration::{Migrator, MigratorTrait};
use sea_orm::DatabaseConnection;
use tokio::{signal, sync::watch};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::{AppConfig, RetentionSettings};
use crate::crypto::CryptoKey;
use crate::db;
use crate::handlers;
use crate::purger::WebhookLogPurger;
use crate::repositories::WebhookLogRepository;
use crate::resync::QueueChangesetSyncer;
use crate::telemetry::trace_context_middleware;
use crate::upsert::ChangesetEventUpserter;
use crate::webhook_logging::{WebhookLogState, webhook_log_middleware};
use crate::webhooks::WebhookRouter;
use crate::webhooks::changesets::ChangesetWebhookHandler;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub crypto_key: Option<CryptoKey>,
    pub router: Arc<WebhookRouter>,
}

/// Wire the webhook router with the changeset handler.
pub async fn build_state(
    config: Arc<AppConfig>,
    db: Arc<DatabaseConnection>,
    crypto_key: Option<CryptoKey>,
) -> AppState {
    let router = Arc::new(WebhookRouter::new());
    let changesets = Arc::new(ChangesetWebhookHandler::new(
        ChangesetEventUpserter::new(db.clone()),
        Arc::new(QueueChangesetSyncer::new(db.clone())),
    ));
    changesets.register(&router).await;

    AppState {
        config,
        db,
        crypto_key,
        router,
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let log_state = WebhookLogState {
        repo: WebhookLogRepository::new(state.db.clone()),
        enabled: state.config.webhook_logging_enabled(),
        max_body_bytes: state.config.webhook_max_body_bytes,
    };

    let webhook_routes = Router::new()
        .route("/webhooks/{id}", post(handlers::webhooks::receive_webhook))
        .route(
            "/.api/github-webhooks",
            post(handlers::webhooks::receive_legacy_github_webhook),
        )
        .route(
            "/.api/bitbucket-cloud-webhooks",
            post(handlers::webhooks::receive_legacy_bitbucket_cloud_webhook),
        )
        .layer(middleware::from_fn_with_state(
            log_state,
            webhook_log_middleware,
        ))
        .layer(DefaultBodyLimit::max(state.config.webhook_max_body_bytes));

    let admin_routes = Router::new()
        .route(
            "/admin/webhook-registrations",
            get(handlers::admin::list_registrations).post(handlers::admin::create_registration),
        )
        .route(
            "/admin/webhook-registrations/{id}",
            axum::routing::delete(handlers::admin::delete_registration),
        )
        .route(
            "/admin/webhook-registrations/{id}/secret",
            put(handlers::admin::rotate_secret),
        )
        .route("/admin/webhook-logs", get(handlers::admin::list_webhook_logs))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .merge(webhook_routes)
        .merge(admin_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(trace_context_middleware)),
        )
}

/// Run migrations and serve until a shutdown signal arrives.
pub async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    let addr = config
        .bind_addr()
        .with_context(|| format!("invalid bind address {:?}", config.api_bind_addr))?;
    let crypto_key = config.crypto_key().context("loading crypto key")?;

    let db = Arc::new(
        db::init_pool(&config)
            .await
            .context("initializing database connection pool")?,
    );
    Migrator::up(db.as_ref(), None)
        .await
        .context("applying migrations")?;

    let shutdown = CancellationToken::new();
    let (settings_tx, settings_rx) = watch::channel(config.retention_settings());
    let purger = WebhookLogPurger::new(WebhookLogRepository::new(db.clone()), settings_rx);
    let purger_handle = tokio::spawn(purger.run(shutdown.clone()));
    let reload_handle = tokio::spawn(reload_on_hangup(settings_tx, shutdown.clone()));

    let logging_enabled = config.webhook_logging_enabled();
    let profile = config.profile.clone();
    let state = build_state(Arc::new(config), db, crypto_key).await;
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, %profile, webhook_logging = logging_enabled, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("serving HTTP")?;

    shutdown.cancel();
    if let Err(err) = purger_handle.await {
        error!(error = %err, "Webhook log purger task failed");
    }
    if let Err(err) = reload_handle.await {
        error!(error = %err, "Configuration reload task failed");
    }
    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C, SIGTERM or external cancellation, then cancels
/// `shutdown` so background tasks stop too.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = shutdown.cancelled() => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
    shutdown.cancel();
}

/// Reload configuration on SIGHUP and publish the new retention settings.
/// Other settings need a restart.
#[cfg(unix)]
async fn reload_on_hangup(settings: watch::Sender<RetentionSettings>, shutdown: CancellationToken) {
    let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(error = %err, "Failed to install SIGHUP handler; configuration reload disabled");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            received = hangup.recv() => {
                if received.is_none() {
                    break;
                }
                match reload_retention_settings() {
                    Ok(next) => {
                        info!(
                            retention_hours = next.retention.as_secs() / 3600,
                            interval_seconds = next.interval.as_secs(),
                            "Reloaded webhook log retention settings"
                        );
                        settings.send_replace(next);
                    }
                    Err(err) => {
                        warn!(error = %err, "Configuration reload failed; keeping current settings");
                    }
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(_settings: watch::Sender<RetentionSettings>, shutdown: CancellationToken) {
    shutdown.cancelled().await;
}

#[cfg(unix)]
fn reload_retention_settings() -> Result<RetentionSettings, crate::config::ConfigError> {
    let config = crate::config::ConfigLoader::new().load()?;
    config.validate()?;
    Ok(config.retention_settings())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::webhooks::receive_webhook,
        crate::handlers::webhooks::receive_legacy_github_webhook,
        crate::handlers::webhooks::receive_legacy_bitbucket_cloud_webhook,
        crate::handlers::admin::create_registration,
        crate::handlers::admin::list_registrations,
        crate::handlers::admin::rotate_secret,
        crate::handlers::admin::delete_registration,
        crate::handlers::admin::list_webhook_logs,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::handlers::HealthResponse,
            crate::handlers::webhooks::WebhookAcceptResponse,
            crate::handlers::admin::CreateRegistrationRequest,
            crate::handlers::admin::RegistrationResponse,
            crate::handlers::admin::RegistrationListResponse,
            crate::handlers::admin::RotateSecretRequest,
            crate::handlers::admin::WebhookLogResponse,
            crate::handlers::admin::WebhookLogListResponse,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Hookgate API",
        description = "Webhook ingestion gateway for code host changeset events",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
