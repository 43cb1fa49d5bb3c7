//! Integration tests for the bounded batch action processor.

mod test_utils;

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use marketsync::batch::{BatchActionProcessor, BatchRunReport};
use marketsync::config::{BatchConfig, CredentialConfig};
use marketsync::credentials::CredentialService;
use marketsync::marketplace::{ApiClient, SignedRequestExecutor};
use marketsync::models::batch_action::status;
use marketsync::models::sync_job::{self, kind};
use marketsync::repositories::run_health::RunOutcome;
use marketsync::repositories::{
    AccountRepository, BatchActionRepository, RunHealthRepository, SyncJobRepository,
};
use sea_orm::DatabaseConnection;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use test_utils::{create_test_account, create_test_tenant, setup_test_db_arc, test_crypto_key};

fn processor(db: &Arc<DatabaseConnection>, base: &str) -> BatchActionProcessor {
    let credentials = Arc::new(CredentialService::new(
        AccountRepository::new(Arc::clone(db), test_crypto_key()),
        reqwest::Client::new(),
        base,
        None,
        &CredentialConfig::default(),
    ));
    let signer = SignedRequestExecutor::new(
        reqwest::Client::new(),
        base.to_string(),
        None,
        Some("test-secret".to_string()),
    );
    BatchActionProcessor::new(
        ApiClient::new(signer, credentials),
        BatchActionRepository::new(Arc::clone(db)),
        RunHealthRepository::new(Arc::clone(db)),
        BatchConfig::default(),
    )
}

/// Enqueue and lease one batch-action job for the account.
async fn leased_job(
    db: &Arc<DatabaseConnection>,
    tenant: Uuid,
    account_id: Uuid,
) -> Result<sync_job::Model> {
    let jobs = SyncJobRepository::new(Arc::clone(db));
    jobs.enqueue(tenant, account_id, kind::BATCH_ACTION, None, Utc::now(), 0)
        .await?;
    let mut claimed = jobs
        .lease_next(kind::BATCH_ACTION, Duration::minutes(10), 1)
        .await?;
    Ok(claimed.remove(0))
}

#[tokio::test]
async fn outcomes_are_matched_by_id_and_partial_failure_keeps_circuit_closed() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let tenant = create_test_tenant(&db, None).await?;
    let server = MockServer::start().await;

    let account = create_test_account(
        &db,
        tenant,
        "shop-1",
        Some("good-token"),
        Some("good-refresh"),
        Some(Utc::now() + Duration::hours(2)),
    )
    .await?;
    let job = leased_job(&db, tenant, account.id).await?;

    Mock::given(method("GET"))
        .and(path("/actions/review_reply/candidates"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 3,
            "items": [
                {"id": "r-1", "candidates": [{"text": "thanks!"}]},
                {"id": "r-2", "candidates": [{"text": "sorry to hear"}]},
                {"id": "r-3", "candidates": []},
            ],
        })))
        .expect(1)
        .mount(&server)
        .await;
    // Results come back in a different order than submission.
    Mock::given(method("POST"))
        .and(path("/actions/review_reply/batch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"id": "r-2", "success": false, "error": "reply too long"},
                {"id": "r-1", "success": true},
            ],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let report = processor(&db, &server.uri()).run(&job).await?;
    assert_eq!(
        report,
        BatchRunReport::Ran {
            submitted: 2,
            succeeded: 1,
            failed: 1,
            skipped: 1,
        }
    );

    let records = BatchActionRepository::new(Arc::clone(&db))
        .list_by_account(tenant, account.id, Some("review_reply"), 50)
        .await?;
    assert_eq!(records.len(), 3);
    let by_target = |id: &str| {
        records
            .iter()
            .find(|r| r.target_id == id)
            .unwrap_or_else(|| panic!("record for {id}"))
    };
    assert_eq!(by_target("r-1").status, status::SUCCESS);
    assert_eq!(by_target("r-2").status, status::FAILED);
    assert_eq!(by_target("r-2").error.as_deref(), Some("reply too long"));
    assert_eq!(by_target("r-3").status, status::SKIPPED);

    // Item failures are not run failures.
    let health = RunHealthRepository::new(Arc::clone(&db))
        .get(account.id, kind::BATCH_ACTION)
        .await?
        .expect("health row");
    assert_eq!(health.consecutive_errors, 0);
    assert!(health.last_error.is_none());
    assert!(!health.is_running);

    Ok(())
}

#[tokio::test]
async fn already_actioned_targets_are_not_submitted_twice() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let tenant = create_test_tenant(&db, None).await?;
    let server = MockServer::start().await;

    let account = create_test_account(
        &db,
        tenant,
        "shop-2",
        Some("good-token"),
        Some("good-refresh"),
        Some(Utc::now() + Duration::hours(2)),
    )
    .await?;
    let job = leased_job(&db, tenant, account.id).await?;

    // The platform lists the same candidate on both runs.
    Mock::given(method("GET"))
        .and(path("/actions/review_reply/candidates"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 1,
            "items": [{"id": "r-1", "candidates": [{"text": "thanks!"}]}],
        })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/actions/review_reply/batch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"id": "r-1", "success": true}],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let engine = processor(&db, &server.uri());

    let first = engine.run(&job).await?;
    assert_eq!(
        first,
        BatchRunReport::Ran {
            submitted: 1,
            succeeded: 1,
            failed: 0,
            skipped: 0,
        }
    );

    let second = engine.run(&job).await?;
    assert_eq!(
        second,
        BatchRunReport::Ran {
            submitted: 0,
            succeeded: 0,
            failed: 0,
            skipped: 1,
        }
    );

    // No duplicate audit row was created for the skip.
    let records = BatchActionRepository::new(Arc::clone(&db))
        .list_by_account(tenant, account.id, Some("review_reply"), 50)
        .await?;
    assert_eq!(records.len(), 1);

    Ok(())
}

#[tokio::test]
async fn batch_level_failure_marks_all_records_and_counts_against_the_breaker() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let tenant = create_test_tenant(&db, None).await?;
    let server = MockServer::start().await;

    let account = create_test_account(
        &db,
        tenant,
        "shop-3",
        Some("good-token"),
        Some("good-refresh"),
        Some(Utc::now() + Duration::hours(2)),
    )
    .await?;
    let job = leased_job(&db, tenant, account.id).await?;

    Mock::given(method("GET"))
        .and(path("/actions/review_reply/candidates"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 2,
            "items": [
                {"id": "r-1", "candidates": [{"text": "a"}]},
                {"id": "r-2", "candidates": [{"text": "b"}]},
            ],
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/actions/review_reply/batch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error_response": {"code": "ServerError", "msg": "backend unavailable"},
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = processor(&db, &server.uri()).run(&job).await;
    assert!(result.is_err());

    let records = BatchActionRepository::new(Arc::clone(&db))
        .list_by_account(tenant, account.id, Some("review_reply"), 50)
        .await?;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.status == status::FAILED));

    let health = RunHealthRepository::new(Arc::clone(&db))
        .get(account.id, kind::BATCH_ACTION)
        .await?
        .expect("health row");
    assert_eq!(health.consecutive_errors, 1);
    assert!(health.last_error.is_some());

    Ok(())
}

#[tokio::test]
async fn failed_targets_are_retried_without_duplicate_records() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let tenant = create_test_tenant(&db, None).await?;
    let server = MockServer::start().await;

    let account = create_test_account(
        &db,
        tenant,
        "shop-5",
        Some("good-token"),
        Some("good-refresh"),
        Some(Utc::now() + Duration::hours(2)),
    )
    .await?;
    let job = leased_job(&db, tenant, account.id).await?;

    Mock::given(method("GET"))
        .and(path("/actions/review_reply/candidates"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 1,
            "items": [{"id": "r-1", "candidates": [{"text": "thanks!"}]}],
        })))
        .expect(2)
        .mount(&server)
        .await;
    // First submission fails at the batch level, the retry succeeds.
    Mock::given(method("POST"))
        .and(path("/actions/review_reply/batch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error_response": {"code": "ServerError", "msg": "backend unavailable"},
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/actions/review_reply/batch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"id": "r-1", "success": true}],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let engine = processor(&db, &server.uri());
    let records = BatchActionRepository::new(Arc::clone(&db));
    let health = RunHealthRepository::new(Arc::clone(&db));

    assert!(engine.run(&job).await.is_err());
    let after_failure = records
        .list_by_account(tenant, account.id, Some("review_reply"), 50)
        .await?;
    assert_eq!(after_failure.len(), 1);
    assert_eq!(after_failure[0].status, status::FAILED);

    // The failed target is re-eligible; the retry reuses its audit row
    // instead of tripping the (account, kind, target, day) uniqueness.
    let second = engine.run(&job).await?;
    assert_eq!(
        second,
        BatchRunReport::Ran {
            submitted: 1,
            succeeded: 1,
            failed: 0,
            skipped: 0,
        }
    );

    let after_retry = records
        .list_by_account(tenant, account.id, Some("review_reply"), 50)
        .await?;
    assert_eq!(after_retry.len(), 1, "the failed row is reused, not duplicated");
    assert_eq!(after_retry[0].id, after_failure[0].id);
    assert_eq!(after_retry[0].status, status::SUCCESS);
    assert!(after_retry[0].error.is_none());

    let stored = health
        .get(account.id, kind::BATCH_ACTION)
        .await?
        .expect("health row");
    assert_eq!(stored.consecutive_errors, 0, "a successful retry closes the streak");

    Ok(())
}

#[tokio::test]
async fn circuit_opens_after_three_failed_runs_and_reset_closes_it() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let tenant = create_test_tenant(&db, None).await?;
    let server = MockServer::start().await;

    let account = create_test_account(
        &db,
        tenant,
        "shop-4",
        Some("good-token"),
        Some("good-refresh"),
        Some(Utc::now() + Duration::hours(2)),
    )
    .await?;
    let job = leased_job(&db, tenant, account.id).await?;

    let health = RunHealthRepository::new(Arc::clone(&db));
    let failed = RunOutcome {
        success_count: 0,
        failure_count: 0,
        skip_count: 0,
        run_error: Some("backend unavailable".to_string()),
    };
    for _ in 0..3 {
        health
            .record_run(tenant, account.id, kind::BATCH_ACTION, &failed)
            .await?;
    }
    assert!(health.is_circuit_open(account.id, kind::BATCH_ACTION, 3).await?);

    let engine = processor(&db, &server.uri());
    let report = engine.run(&job).await?;
    assert_eq!(report, BatchRunReport::CircuitOpen);
    assert!(
        server.received_requests().await.unwrap_or_default().is_empty(),
        "an open circuit must not touch the platform"
    );

    // Operator reset closes the circuit; the next run executes normally.
    assert!(health.reset_errors(account.id, kind::BATCH_ACTION).await?);
    Mock::given(method("GET"))
        .and(path("/actions/review_reply/candidates"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 0,
            "items": [],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let report = engine.run(&job).await?;
    assert_eq!(
        report,
        BatchRunReport::Ran {
            submitted: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
        }
    );
    let stored = health
        .get(account.id, kind::BATCH_ACTION)
        .await?
        .expect("health row");
    assert_eq!(stored.consecutive_errors, 0);

    Ok(())
}
