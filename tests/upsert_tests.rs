mod test_utils;

use chrono::{TimeZone, Utc};
use hookgate::{
    changeset_events::{
        ChangesetEventKind, Metadata, NormalizedEvent,
        metadata::{GitHubCheck, GitHubComment},
    },
    error::WebhookError,
    models::{ChangesetEvent, changeset},
    upsert::{ChangesetEventUpserter, UpsertOutcome},
    webhooks::PrIdentity,
};
use sea_orm::EntityTrait;
use tempfile::TempDir;
use test_utils::*;
use tokio::task::JoinSet;

fn check_run(status: &str, conclusion: &str, hour: u32) -> NormalizedEvent {
    NormalizedEvent::new(
        ChangesetEventKind::GitHubCheckRun,
        "5",
        Metadata::GitHubCheck(GitHubCheck {
            id: 5,
            name: "lint".to_string(),
            head_sha: "abc".to_string(),
            status: status.to_string(),
            conclusion: conclusion.to_string(),
            received_at: Some(Utc.with_ymd_and_hms(2026, 1, 5, hour, 0, 0).unwrap()),
        }),
    )
}

#[tokio::test]
async fn merge_never_loses_information() {
    let db = setup_test_db().await.unwrap();
    let repo_id = insert_repo(&db, "R_1", "github", GITHUB_URL).await.unwrap();
    let changeset_id = insert_changeset(&db, repo_id, "7", "github", None)
        .await
        .unwrap();
    let upserter = ChangesetEventUpserter::new(db.clone());
    let identity = PrIdentity::new(7, "R_1");

    let first = upserter
        .upsert(GITHUB_URL, "github", &identity, &check_run("completed", "success", 10))
        .await
        .unwrap();
    assert_eq!(
        first,
        UpsertOutcome::Applied {
            changeset_id,
            created: true
        }
    );

    // A late, less complete delivery of the same run.
    let second = upserter
        .upsert(GITHUB_URL, "github", &identity, &check_run("completed", "", 9))
        .await
        .unwrap();
    assert_eq!(
        second,
        UpsertOutcome::Applied {
            changeset_id,
            created: false
        }
    );

    let rows = ChangesetEvent::find().all(db.as_ref()).await.unwrap();
    assert_eq!(rows.len(), 1);
    let Metadata::GitHubCheck(stored) =
        Metadata::decode(ChangesetEventKind::GitHubCheckRun, rows[0].metadata.clone()).unwrap()
    else {
        panic!("unexpected metadata shape");
    };
    assert_eq!(stored.conclusion, "success");
    assert_eq!(
        stored.received_at,
        Some(Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap())
    );

    let changeset = changeset::Entity::find_by_id(changeset_id)
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(changeset.check_state, "PASSED");
}

#[tokio::test]
async fn untracked_changeset_is_not_written() {
    let db = setup_test_db().await.unwrap();
    let repo_id = insert_repo(&db, "R_1", "github", GITHUB_URL).await.unwrap();
    insert_changeset(&db, repo_id, "7", "github", None).await.unwrap();
    let upserter = ChangesetEventUpserter::new(db.clone());

    let outcome = upserter
        .upsert(
            GITHUB_URL,
            "github",
            &PrIdentity::new(8, "R_1"),
            &check_run("queued", "", 10),
        )
        .await
        .unwrap();
    assert_eq!(outcome, UpsertOutcome::NotTracked);

    let outcome = upserter
        .upsert(
            "https://github.example.com",
            "github",
            &PrIdentity::new(7, "R_1"),
            &check_run("queued", "", 10),
        )
        .await
        .unwrap();
    assert_eq!(outcome, UpsertOutcome::NotTracked);
    assert!(ChangesetEvent::find().all(db.as_ref()).await.unwrap().is_empty());
}

#[tokio::test]
async fn ambiguous_repo_is_an_invariant_violation() {
    let db = setup_test_db().await.unwrap();
    let repo_id = insert_repo(&db, "R_1", "github", GITHUB_URL).await.unwrap();
    insert_repo(&db, "R_1", "github", GITHUB_URL).await.unwrap();
    insert_changeset(&db, repo_id, "7", "github", None).await.unwrap();
    let upserter = ChangesetEventUpserter::new(db.clone());

    let err = upserter
        .upsert(
            GITHUB_URL,
            "github",
            &PrIdentity::new(7, "R_1"),
            &check_run("queued", "", 10),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WebhookError::InvariantViolation(_)));
}

#[tokio::test]
async fn metadata_that_does_not_fit_its_kind_is_rejected() {
    let db = setup_test_db().await.unwrap();
    let repo_id = insert_repo(&db, "R_1", "github", GITHUB_URL).await.unwrap();
    insert_changeset(&db, repo_id, "7", "github", None).await.unwrap();
    let upserter = ChangesetEventUpserter::new(db.clone());

    let mismatched = NormalizedEvent::new(
        ChangesetEventKind::GitHubCheckRun,
        "5",
        Metadata::GitHubComment(GitHubComment::default()),
    );
    let err = upserter
        .upsert(GITHUB_URL, "github", &PrIdentity::new(7, "R_1"), &mismatched)
        .await
        .unwrap_err();
    assert!(matches!(err, WebhookError::InvariantViolation(_)));
    assert!(ChangesetEvent::find().all(db.as_ref()).await.unwrap().is_empty());
}

#[tokio::test]
async fn branch_lookup_matches_head_branch() {
    let db = setup_test_db().await.unwrap();
    let repo_id = insert_repo(&db, "R_1", "github", GITHUB_URL).await.unwrap();
    insert_changeset(&db, repo_id, "1", "github", Some("main"))
        .await
        .unwrap();
    insert_changeset(&db, repo_id, "2", "github", Some("feature"))
        .await
        .unwrap();
    let upserter = ChangesetEventUpserter::new(db.clone());

    let identities = upserter
        .identities_on_branches(GITHUB_URL, "github", "R_1", &["main".to_string()])
        .await
        .unwrap();
    assert_eq!(identities, vec![PrIdentity::new(1, "R_1")]);

    let none = upserter
        .identities_on_branches(GITHUB_URL, "github", "R_unknown", &["main".to_string()])
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_deliveries_for_one_changeset_all_apply() {
    let dir = TempDir::new().unwrap();
    let db = setup_file_db(&dir, 8).await.unwrap();
    let repo_id = insert_repo(&db, "R_1", "github", GITHUB_URL).await.unwrap();
    let changeset_id = insert_changeset(&db, repo_id, "7", "github", None)
        .await
        .unwrap();
    let upserter = ChangesetEventUpserter::new(db.clone());

    let mut deliveries = JoinSet::new();
    for n in 0..8 {
        let upserter = upserter.clone();
        deliveries.spawn(async move {
            let event = if n % 2 == 0 {
                check_run("completed", "success", 10)
            } else {
                check_run("in_progress", "", 9)
            };
            upserter
                .upsert(GITHUB_URL, "github", &PrIdentity::new(7, "R_1"), &event)
                .await
        });
    }

    let mut created = 0;
    while let Some(joined) = deliveries.join_next().await {
        match joined.unwrap() {
            Ok(UpsertOutcome::Applied {
                changeset_id: applied_to,
                created: was_created,
            }) => {
                assert_eq!(applied_to, changeset_id);
                if was_created {
                    created += 1;
                }
            }
            other => panic!("delivery not applied: {other:?}"),
        }
    }
    assert_eq!(created, 1);

    let rows = ChangesetEvent::find().all(db.as_ref()).await.unwrap();
    assert_eq!(rows.len(), 1);
    let Metadata::GitHubCheck(stored) =
        Metadata::decode(ChangesetEventKind::GitHubCheckRun, rows[0].metadata.clone()).unwrap()
    else {
        panic!("unexpected metadata shape");
    };
    assert_eq!(stored.conclusion, "success");
}
