//! Background removal of expired webhook diagnostic logs.

use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::{counter, histogram};
use sea_orm::DbErr;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::config::RetentionSettings;
use crate::repositories::WebhookLogRepository;

pub struct WebhookLogPurger {
    repo: WebhookLogRepository,
    settings: watch::Receiver<RetentionSettings>,
}

impl WebhookLogPurger {
    pub fn new(repo: WebhookLogRepository, settings: watch::Receiver<RetentionSettings>) -> Self {
        Self { repo, settings }
    }

    /// Purge every interval until `shutdown` fires. A settings change
    /// restarts the wait with the new interval.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Starting webhook log purger");

        let mut settings_open = true;
        loop {
            let interval = self.settings.borrow().interval;
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Webhook log purger shutdown requested");
                    break;
                }
                changed = self.settings.changed(), if settings_open => {
                    if changed.is_err() {
                        debug!("Retention settings channel closed, keeping current settings");
                        settings_open = false;
                        continue;
                    }
                    let settings = *self.settings.borrow_and_update();
                    info!(
                        retention_secs = settings.retention.as_secs(),
                        interval_secs = settings.interval.as_secs(),
                        "Webhook log retention settings updated"
                    );
                }
                _ = sleep(interval) => self.run_tick().await,
            }
        }

        info!("Webhook log purger stopped");
    }

    async fn run_tick(&self) {
        let started = Instant::now();
        if let Err(err) = self.tick().await {
            error!(error = %err, "Webhook log purge failed");
        }
        histogram!("webhook_log_purge_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
    }

    /// Delete logs older than the configured retention.
    pub async fn tick(&self) -> Result<u64, DbErr> {
        self.purge_before(Utc::now()).await
    }

    #[instrument(skip(self))]
    pub async fn purge_before(&self, now: DateTime<Utc>) -> Result<u64, DbErr> {
        let retention = self.settings.borrow().retention;
        let retention = ChronoDuration::from_std(retention).unwrap_or(ChronoDuration::MAX);
        let cutoff = now.checked_sub_signed(retention).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let purged = self.repo.purge_older_than(cutoff).await?;
        counter!("webhook_log_purged_total").increment(purged);
        if purged > 0 {
            info!(purged, %cutoff, "Purged expired webhook logs");
        } else {
            debug!(%cutoff, "No expired webhook logs");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;
    use std::sync::Arc;
    use std::time::Duration;

    async fn purger(settings: RetentionSettings) -> (WebhookLogPurger, watch::Sender<RetentionSettings>) {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let (tx, rx) = watch::channel(settings);
        (WebhookLogPurger::new(WebhookLogRepository::new(Arc::new(db)), rx), tx)
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let (purger, _tx) = purger(RetentionSettings::default()).await;
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(purger.run(shutdown.clone()));
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("purger stops promptly")
            .unwrap();
    }

    #[tokio::test]
    async fn purge_on_empty_table_is_a_noop() {
        let (purger, _tx) = purger(RetentionSettings::default()).await;
        assert_eq!(purger.tick().await.unwrap(), 0);
    }
}
