mod test_utils;

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use hookgate::{
    config::RetentionSettings,
    models::WebhookLog,
    purger::WebhookLogPurger,
    repositories::{WebhookLogRepository, webhook_log::NewWebhookLog},
};
use sea_orm::EntityTrait;
use serde_json::json;
use test_utils::setup_test_db;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

fn record(hours_ago: i64) -> NewWebhookLog {
    NewWebhookLog {
        webhook_registration_id: None,
        code_host_id: None,
        status_code: 200,
        request: json!({"hours_ago": hours_ago}),
        response: json!({}),
        received_at: Utc::now() - ChronoDuration::hours(hours_ago),
    }
}

fn settings(retention_hours: u64, interval: Duration) -> RetentionSettings {
    RetentionSettings {
        retention: Duration::from_secs(retention_hours * 3600),
        interval,
    }
}

#[tokio::test]
async fn purge_removes_only_records_past_retention() {
    let db = setup_test_db().await.unwrap();
    let repo = WebhookLogRepository::new(db.clone());
    repo.insert(record(5)).await.unwrap();
    let recent = repo.insert(record(1)).await.unwrap();

    let (_tx, rx) = watch::channel(settings(4, Duration::from_secs(3600)));
    let purger = WebhookLogPurger::new(repo, rx);

    assert_eq!(purger.tick().await.unwrap(), 1);
    let remaining = WebhookLog::find().all(db.as_ref()).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, recent.id);

    assert_eq!(purger.tick().await.unwrap(), 0);
}

#[tokio::test]
async fn retention_changes_apply_without_restart() {
    let db = setup_test_db().await.unwrap();
    let repo = WebhookLogRepository::new(db.clone());
    repo.insert(record(5)).await.unwrap();
    repo.insert(record(1)).await.unwrap();

    let (tx, rx) = watch::channel(settings(72, Duration::from_secs(3600)));
    let purger = WebhookLogPurger::new(repo, rx);
    assert_eq!(purger.tick().await.unwrap(), 0);

    tx.send_replace(settings(4, Duration::from_secs(3600)));
    assert_eq!(purger.tick().await.unwrap(), 1);
}

#[tokio::test]
async fn running_purger_ticks_on_interval() {
    let db = setup_test_db().await.unwrap();
    let repo = WebhookLogRepository::new(db.clone());
    repo.insert(record(5)).await.unwrap();

    let (_tx, rx) = watch::channel(settings(4, Duration::from_millis(20)));
    let purger = WebhookLogPurger::new(repo, rx);
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(purger.run(shutdown.clone()));

    let mut purged = false;
    for _ in 0..250 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if WebhookLog::find().all(db.as_ref()).await.unwrap().is_empty() {
            purged = true;
            break;
        }
    }
    shutdown.cancel();
    handle.await.unwrap();
    assert!(purged, "purger never removed the expired record");
}
