//! Integration tests for the job executor's settlement path.

mod test_utils;

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use marketsync::audit::TracingAuditSink;
use marketsync::batch::BatchActionProcessor;
use marketsync::chunker::ChunkPlanner;
use marketsync::config::{
    BatchConfig, ChunkingConfig, CredentialConfig, QueueConfig, RetryPolicyConfig,
};
use marketsync::credentials::CredentialService;
use marketsync::error::MarketError;
use marketsync::executor::JobExecutor;
use marketsync::marketplace::{ApiClient, SignedRequestExecutor};
use marketsync::models::sync_job::{kind, status};
use marketsync::models::sync_progress::stage;
use marketsync::repositories::{
    AccountRepository, BatchActionRepository, RunHealthRepository, SyncJobRepository,
    SyncProgressRepository,
};
use sea_orm::DatabaseConnection;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use test_utils::{create_test_account, create_test_tenant, setup_test_db_arc, test_crypto_key};

fn client(db: &Arc<DatabaseConnection>, base: &str) -> ApiClient {
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
    ApiClient::new(signer, credentials)
}

fn planner(db: &Arc<DatabaseConnection>, base: &str) -> ChunkPlanner {
    ChunkPlanner::new(
        client(db, base),
        SyncJobRepository::new(Arc::clone(db)),
        SyncProgressRepository::new(Arc::clone(db)),
        ChunkingConfig::default(),
    )
}

fn executor(db: &Arc<DatabaseConnection>, base: &str) -> JobExecutor {
    let api = client(db, base);
    let batch = BatchActionProcessor::new(
        api.clone(),
        BatchActionRepository::new(Arc::clone(db)),
        RunHealthRepository::new(Arc::clone(db)),
        BatchConfig::default(),
    );
    JobExecutor::new(
        SyncJobRepository::new(Arc::clone(db)),
        planner(db, base),
        batch,
        Arc::new(TracingAuditSink),
        RunHealthRepository::new(Arc::clone(db)),
        QueueConfig::default(),
        RetryPolicyConfig::default(),
    )
}

#[tokio::test]
async fn completed_sync_job_records_a_successful_run() -> Result<()> {
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

    // Two units fit well under the inline threshold; the count call and the
    // single page fetch both hit the same path.
    Mock::given(method("GET"))
        .and(path("/catalog/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 2,
            "items": [{"id": "a"}, {"id": "b"}],
        })))
        .expect(2)
        .mount(&server)
        .await;

    let jobs = SyncJobRepository::new(Arc::clone(&db));
    let job = jobs
        .enqueue(tenant, account.id, kind::FULL_SYNC, None, Utc::now(), 0)
        .await?;

    executor(&db, &server.uri()).tick().await;

    let stored = jobs.get(job.id).await?.expect("job exists");
    assert_eq!(stored.status, status::COMPLETED);

    let health = RunHealthRepository::new(Arc::clone(&db))
        .get(account.id, kind::FULL_SYNC)
        .await?
        .expect("health row written for the sync kind");
    assert_eq!(health.last_success_count, 1);
    assert_eq!(health.consecutive_errors, 0);
    assert!(health.last_error.is_none());
    assert!(health.last_run_at.is_some());

    Ok(())
}

#[tokio::test]
async fn permanently_failed_sync_job_surfaces_in_run_health() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let tenant = create_test_tenant(&db, None).await?;
    let server = MockServer::start().await;

    let account_id = Uuid::new_v4();
    let progress = SyncProgressRepository::new(Arc::clone(&db));

    // A previous run still has chunks outstanding.
    let run = progress
        .start_run(tenant, account_id, "/catalog/items", 500, 100, 5)
        .await?;
    progress.set_stage(run.id, stage::FETCHING_PHASE_ONE).await?;

    let jobs = SyncJobRepository::new(Arc::clone(&db));
    let job = jobs
        .enqueue(tenant, account_id, kind::FULL_SYNC, None, Utc::now(), 0)
        .await?;

    executor(&db, &server.uri()).tick().await;

    let stored = jobs.get(job.id).await?.expect("job exists");
    assert_eq!(stored.status, status::FAILED);

    let health = RunHealthRepository::new(Arc::clone(&db))
        .get(account_id, kind::FULL_SYNC)
        .await?
        .expect("health row written for the failed sync");
    assert_eq!(health.consecutive_errors, 1);
    assert_eq!(health.last_failure_count, 1);
    assert!(
        health
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("still fetching")),
        "last_error: {:?}",
        health.last_error
    );

    Ok(())
}

#[tokio::test]
async fn replanning_while_chunks_are_outstanding_is_rejected() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let tenant = create_test_tenant(&db, None).await?;
    let server = MockServer::start().await;

    let account_id = Uuid::new_v4();
    let progress = SyncProgressRepository::new(Arc::clone(&db));
    let run = progress
        .start_run(tenant, account_id, "/catalog/items", 300, 100, 3)
        .await?;
    progress.set_stage(run.id, stage::FETCHING_PHASE_TWO).await?;

    let jobs = SyncJobRepository::new(Arc::clone(&db));
    jobs.enqueue(tenant, account_id, kind::FULL_SYNC, None, Utc::now(), 0)
        .await?;
    let mut claimed = jobs
        .lease_next(kind::FULL_SYNC, Duration::minutes(10), 1)
        .await?;
    let job = claimed.remove(0);

    let result = planner(&db, &server.uri()).plan(&job).await;
    assert!(matches!(result, Err(MarketError::Validation(_))));
    assert!(
        server.received_requests().await.unwrap_or_default().is_empty(),
        "a rejected replan must not touch the platform"
    );

    // The outstanding run is untouched.
    let unchanged = progress.get(run.id).await?.expect("run exists");
    assert_eq!(unchanged.stage, stage::FETCHING_PHASE_TWO);
    assert_eq!(unchanged.chunks_reported, 0);

    Ok(())
}
