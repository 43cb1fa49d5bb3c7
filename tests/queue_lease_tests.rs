//! Integration tests for the durable job queue and lease manager.

mod test_utils;

use anyhow::Result;
use chrono::{Duration, Utc};
use marketsync::models::sync_job::{kind, status};
use marketsync::repositories::SyncJobRepository;
use serde_json::json;
use uuid::Uuid;

use test_utils::{create_test_tenant, setup_test_db_arc};

fn lease() -> Duration {
    Duration::seconds(600)
}

#[tokio::test]
async fn lease_claims_oldest_eligible_job_first() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let tenant = create_test_tenant(&db, None).await?;
    let repo = SyncJobRepository::new(db.clone());

    let account_a = Uuid::new_v4();
    let account_b = Uuid::new_v4();
    let earlier = Utc::now() - Duration::minutes(10);
    let later = Utc::now() - Duration::minutes(1);

    let old_job = repo
        .enqueue(tenant, account_a, kind::FULL_SYNC, None, earlier, 0)
        .await?;
    repo.enqueue(tenant, account_b, kind::FULL_SYNC, None, later, 0)
        .await?;

    let claimed = repo.lease_next(kind::FULL_SYNC, lease(), 1).await?;
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, old_job.id);
    assert_eq!(claimed[0].status, status::LEASED);
    assert_eq!(claimed[0].attempts, 1);
    assert!(claimed[0].lease_expires_at.is_some());

    Ok(())
}

#[tokio::test]
async fn leased_job_is_not_claimed_twice() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let tenant = create_test_tenant(&db, None).await?;
    let repo = SyncJobRepository::new(db.clone());

    let account = Uuid::new_v4();
    repo.enqueue(tenant, account, kind::FULL_SYNC, None, Utc::now(), 0)
        .await?;

    let first = repo.lease_next(kind::FULL_SYNC, lease(), 10).await?;
    assert_eq!(first.len(), 1);

    let second = repo.lease_next(kind::FULL_SYNC, lease(), 10).await?;
    assert!(second.is_empty());

    Ok(())
}

#[tokio::test]
async fn one_lease_per_account_and_kind() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let tenant = create_test_tenant(&db, None).await?;
    let repo = SyncJobRepository::new(db.clone());

    let account = Uuid::new_v4();
    // Two pending jobs of the same kind for the same account.
    repo.enqueue(tenant, account, kind::CHUNK, None, Utc::now(), 0)
        .await?;
    repo.enqueue(tenant, account, kind::CHUNK, None, Utc::now(), 0)
        .await?;

    let first = repo.lease_next(kind::CHUNK, lease(), 10).await?;
    assert_eq!(first.len(), 1, "only one job per account may be claimed");

    // While the first is leased, the second stays pending.
    let second = repo.lease_next(kind::CHUNK, lease(), 10).await?;
    assert!(second.is_empty());

    // Completing the first frees the account for the second.
    repo.complete(first[0].id).await?;
    let third = repo.lease_next(kind::CHUNK, lease(), 10).await?;
    assert_eq!(third.len(), 1);
    assert_ne!(third[0].id, first[0].id);

    Ok(())
}

#[tokio::test]
async fn different_kinds_lease_independently() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let tenant = create_test_tenant(&db, None).await?;
    let repo = SyncJobRepository::new(db.clone());

    let account = Uuid::new_v4();
    repo.enqueue(tenant, account, kind::FULL_SYNC, None, Utc::now(), 0)
        .await?;
    repo.enqueue(tenant, account, kind::BATCH_ACTION, None, Utc::now(), 0)
        .await?;

    let syncs = repo.lease_next(kind::FULL_SYNC, lease(), 10).await?;
    let actions = repo.lease_next(kind::BATCH_ACTION, lease(), 10).await?;
    assert_eq!(syncs.len(), 1);
    assert_eq!(actions.len(), 1);

    Ok(())
}

#[tokio::test]
async fn retry_after_gates_eligibility() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let tenant = create_test_tenant(&db, None).await?;
    let repo = SyncJobRepository::new(db.clone());

    let account = Uuid::new_v4();
    repo.enqueue(tenant, account, kind::FULL_SYNC, None, Utc::now(), 0)
        .await?;

    let claimed = repo.lease_next(kind::FULL_SYNC, lease(), 1).await?;
    let job_id = claimed[0].id;

    // Requeue with a backoff one hour out: not eligible yet.
    repo.requeue(
        job_id,
        json!({"code": "TRANSPORT", "message": "boom"}),
        Utc::now() + Duration::hours(1),
    )
    .await?;

    assert!(repo.lease_next(kind::FULL_SYNC, lease(), 1).await?.is_empty());

    let stored = repo.get(job_id).await?.expect("job exists");
    assert_eq!(stored.status, status::PENDING);
    assert!(stored.retry_after.is_some());
    assert!(stored.error.is_some());

    Ok(())
}

#[tokio::test]
async fn expired_lease_is_swept_back_to_pending_once() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let tenant = create_test_tenant(&db, None).await?;
    let repo = SyncJobRepository::new(db.clone());

    let account = Uuid::new_v4();
    repo.enqueue(tenant, account, kind::FULL_SYNC, None, Utc::now(), 0)
        .await?;

    // Lease with a 10-minute duration, then sweep as if 11 minutes passed.
    let claimed = repo
        .lease_next(kind::FULL_SYNC, Duration::minutes(10), 1)
        .await?;
    let job_id = claimed[0].id;

    let reclaimed = repo.sweep_expired(Utc::now() + Duration::minutes(11)).await?;
    assert_eq!(reclaimed, 1);

    let stored = repo.get(job_id).await?.expect("job exists");
    assert_eq!(stored.status, status::PENDING);
    assert!(stored.lease_expires_at.is_none());

    // A second sweep finds nothing; the reset happens exactly once.
    let again = repo.sweep_expired(Utc::now() + Duration::minutes(12)).await?;
    assert_eq!(again, 0);

    // The job is claimable again and carries its attempt history.
    let reclaimed_job = repo.lease_next(kind::FULL_SYNC, lease(), 1).await?;
    assert_eq!(reclaimed_job[0].id, job_id);
    assert_eq!(reclaimed_job[0].attempts, 2);

    Ok(())
}

#[tokio::test]
async fn sweep_leaves_live_leases_alone() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let tenant = create_test_tenant(&db, None).await?;
    let repo = SyncJobRepository::new(db.clone());

    repo.enqueue(tenant, Uuid::new_v4(), kind::FULL_SYNC, None, Utc::now(), 0)
        .await?;
    let claimed = repo.lease_next(kind::FULL_SYNC, lease(), 1).await?;

    let reclaimed = repo.sweep_expired(Utc::now()).await?;
    assert_eq!(reclaimed, 0);

    let stored = repo.get(claimed[0].id).await?.expect("job exists");
    assert_eq!(stored.status, status::LEASED);

    Ok(())
}

#[tokio::test]
async fn terminal_transitions_clear_the_lease() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let tenant = create_test_tenant(&db, None).await?;
    let repo = SyncJobRepository::new(db.clone());

    repo.enqueue(tenant, Uuid::new_v4(), kind::FULL_SYNC, None, Utc::now(), 0)
        .await?;
    repo.enqueue(tenant, Uuid::new_v4(), kind::FULL_SYNC, None, Utc::now(), 0)
        .await?;
    let claimed = repo.lease_next(kind::FULL_SYNC, lease(), 2).await?;
    assert_eq!(claimed.len(), 2);

    repo.complete(claimed[0].id).await?;
    repo.mark_failed(claimed[1].id, json!({"code": "PLATFORM", "message": "gone"}))
        .await?;

    let completed = repo.get(claimed[0].id).await?.expect("job exists");
    assert_eq!(completed.status, status::COMPLETED);
    assert!(completed.lease_expires_at.is_none());
    assert!(completed.finished_at.is_some());

    let failed = repo.get(claimed[1].id).await?.expect("job exists");
    assert_eq!(failed.status, status::FAILED);
    assert!(failed.lease_expires_at.is_none());
    assert!(failed.error.is_some());

    Ok(())
}

#[tokio::test]
async fn claims_carry_this_calls_lease_stamp() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let tenant = create_test_tenant(&db, None).await?;
    let repo = SyncJobRepository::new(db.clone());

    repo.enqueue(tenant, Uuid::new_v4(), kind::FULL_SYNC, None, Utc::now(), 0)
        .await?;
    repo.enqueue(tenant, Uuid::new_v4(), kind::FULL_SYNC, None, Utc::now(), 0)
        .await?;

    let claimed = repo.lease_next(kind::FULL_SYNC, lease(), 10).await?;
    assert_eq!(claimed.len(), 2);

    // Every returned row was stamped by this claim: one shared started_at,
    // with the lease window measured from it. The claim re-select filters
    // on that stamp, so rows flipped by another claimer are never returned.
    let stamp = claimed[0].started_at.expect("claim stamps started_at");
    for job in &claimed {
        assert_eq!(job.started_at, Some(stamp));
        assert_eq!(job.lease_expires_at, Some(stamp + lease()));
    }

    Ok(())
}

#[tokio::test]
async fn priority_orders_claims_before_age() -> Result<()> {
    let db = setup_test_db_arc().await?;
    let tenant = create_test_tenant(&db, None).await?;
    let repo = SyncJobRepository::new(db.clone());

    let older = Utc::now() - Duration::minutes(30);
    repo.enqueue(tenant, Uuid::new_v4(), kind::FULL_SYNC, None, older, 0)
        .await?;
    let urgent = repo
        .enqueue(tenant, Uuid::new_v4(), kind::FULL_SYNC, None, Utc::now(), 10)
        .await?;

    let claimed = repo.lease_next(kind::FULL_SYNC, lease(), 1).await?;
    assert_eq!(claimed[0].id, urgent.id);

    Ok(())
}
