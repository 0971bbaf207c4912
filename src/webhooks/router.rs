//! Dispatch table from `(code host kind, event type)` to handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrics::{counter, histogram};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use super::{CodeHostKind, WebhookEvent};
use crate::error::WebhookError;
use crate::webhook_verification::BITBUCKET_SERVER_PING;

/// Request-level facts a handler may need besides the event itself.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub kind: CodeHostKind,
    /// Normalized base URL of the registration's code host.
    pub code_host_url: String,
    pub event_type: String,
}

#[async_trait]
pub trait WebhookHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(
        &self,
        ctx: &DispatchContext,
        event: Arc<WebhookEvent>,
    ) -> Result<(), WebhookError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub handled: usize,
}

type HandlerTable = HashMap<(CodeHostKind, String), Vec<Arc<dyn WebhookHandler>>>;

/// Registry of webhook handlers. Built once at startup and shared through
/// application state.
pub struct WebhookRouter {
    handlers: RwLock<HandlerTable>,
}

/// Acknowledges connectivity checks without doing any work.
struct PingHandler;

#[async_trait]
impl WebhookHandler for PingHandler {
    fn name(&self) -> &'static str {
        "ping"
    }

    async fn handle(
        &self,
        ctx: &DispatchContext,
        _event: Arc<WebhookEvent>,
    ) -> Result<(), WebhookError> {
        debug!(code_host = %ctx.kind, url = %ctx.code_host_url, "Webhook ping received");
        Ok(())
    }
}

impl Default for WebhookRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookRouter {
    /// Router preloaded with the no-op ping handlers.
    pub fn new() -> Self {
        let ping: Arc<dyn WebhookHandler> = Arc::new(PingHandler);
        let mut table = HandlerTable::new();
        table.insert((CodeHostKind::GitHub, "ping".to_string()), vec![ping.clone()]);
        table.insert(
            (CodeHostKind::BitbucketServer, BITBUCKET_SERVER_PING.to_string()),
            vec![ping],
        );
        Self {
            handlers: RwLock::new(table),
        }
    }

    /// Append `handler` for every listed event type. Registering the same
    /// handler twice runs it twice.
    pub async fn register(
        &self,
        handler: Arc<dyn WebhookHandler>,
        kind: CodeHostKind,
        event_types: &[&str],
    ) {
        let mut table = self.handlers.write().await;
        for event_type in event_types {
            table
                .entry((kind, (*event_type).to_string()))
                .or_default()
                .push(handler.clone());
        }
        info!(
            handler = handler.name(),
            code_host = %kind,
            event_types = event_types.len(),
            "Registered webhook handler"
        );
    }

    /// Number of handlers registered for a pair.
    pub async fn handler_count(&self, kind: CodeHostKind, event_type: &str) -> usize {
        self.handlers
            .read()
            .await
            .get(&(kind, event_type.to_string()))
            .map_or(0, Vec::len)
    }

    /// Run every handler registered for the event concurrently and wait for
    /// all of them. The first failure in registration order is returned.
    pub async fn dispatch(
        &self,
        ctx: DispatchContext,
        event: Arc<WebhookEvent>,
    ) -> Result<DispatchOutcome, WebhookError> {
        let handlers = {
            let table = self.handlers.read().await;
            table
                .get(&(ctx.kind, ctx.event_type.clone()))
                .cloned()
                .unwrap_or_default()
        };

        if handlers.is_empty() {
            info!(
                code_host = %ctx.kind,
                event_type = %ctx.event_type,
                "No handlers registered for webhook event"
            );
            return Ok(DispatchOutcome { handled: 0 });
        }

        let started = Instant::now();
        let ctx = Arc::new(ctx);
        let mut tasks = JoinSet::new();
        let mut slots = HashMap::with_capacity(handlers.len());
        for (index, handler) in handlers.iter().cloned().enumerate() {
            let ctx = ctx.clone();
            let event = event.clone();
            let name = handler.name();
            let task = tasks.spawn(async move { handler.handle(&ctx, event).await });
            slots.insert(task.id(), (index, name));
        }

        let mut results: Vec<Option<Result<(), WebhookError>>> =
            (0..handlers.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(join_err) => {
                    let id = join_err.id();
                    let message = format!("handler task aborted: {join_err}");
                    (id, Err(WebhookError::InvariantViolation(message)))
                }
            };
            let Some(&(index, name)) = slots.get(&id) else {
                continue;
            };
            if let Err(err) = &result {
                error!(handler = name, event_type = %ctx.event_type, error = %err, "Webhook handler failed");
            }
            results[index] = Some(result);
        }

        histogram!("webhook_dispatch_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
        counter!("webhook_dispatch_handlers_total").increment(handlers.len() as u64);

        for result in results.into_iter().flatten() {
            result?;
        }
        Ok(DispatchOutcome {
            handled: handlers.len(),
        })
    }
}
