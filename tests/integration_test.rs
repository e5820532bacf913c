//! Tests against the shared backends.
//!
//! These require a PostgreSQL database (`DATABASE_URL`) and a dedicated,
//! empty Redis database (`REDIS_URL`).
//!
//! Run with: cargo test --test integration_test -- --ignored --test-threads=1

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use stegnox::config::PoolSettings;
use stegnox::db::{self, PgJobStore};
use stegnox::models::job::{Job, JobFilter, JobPriority, JobStatus};
use stegnox::models::method_result::ResultSet;
use stegnox::services::{
    dispatcher::Dispatcher,
    job_store::{JobStore, StoreError},
    lifecycle::{JobController, LifecycleError},
    queue::{PendingQueue, QueuedJob, RedisQueue},
};

fn env(name: &str) -> String {
    dotenvy::dotenv().ok();
    std::env::var(name).unwrap_or_else(|_| panic!("{name} must be set"))
}

async fn pg_store() -> Arc<PgJobStore> {
    let pool = db::init_pool(&env("DATABASE_URL"), &PoolSettings::default())
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    Arc::new(PgJobStore::new(pool))
}

fn redis_queue() -> Arc<RedisQueue> {
    Arc::new(RedisQueue::new(&env("REDIS_URL")).expect("Failed to initialize Redis queue"))
}

#[tokio::test]
#[ignore]
async fn test_postgres_job_lifecycle() {
    let store = pg_store().await;
    store.health_check().await.unwrap();
    let controller = JobController::new(store.clone());

    let job = Job::new("uploads/it.png", JobPriority::High, Some("it.png".to_string()), Utc::now());
    store.insert(&job).await.unwrap();
    assert!(matches!(store.insert(&job).await, Err(StoreError::Duplicate(_))));

    let claimed = controller.claim(job.id, "it-worker").await.unwrap();
    assert_eq!(claimed.status, JobStatus::Processing);
    assert!(matches!(
        controller.claim(job.id, "other").await,
        Err(LifecycleError::AlreadyClaimed { .. })
    ));

    let mut raw = serde_json::Map::new();
    raw.insert("lsb_extraction".to_string(), json!({ "message": "hi" }));
    let done = controller
        .complete(job.id, ResultSet::from_raw(raw))
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Completed);

    let stored = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.worker_id.as_deref(), Some("it-worker"));
    assert_eq!(
        stored.results.unwrap().get("lsb_extraction").unwrap().message(),
        Some("hi")
    );
    assert!(stored.completed_at.unwrap() >= stored.started_at.unwrap());

    let completed = store
        .list(&JobFilter {
            limit: Some(500),
            ..JobFilter::with_status(JobStatus::Completed)
        })
        .await
        .unwrap();
    assert!(completed.iter().any(|j| j.id == job.id));
}

#[tokio::test]
#[ignore]
async fn test_postgres_concurrent_claims_have_one_winner() {
    let store = pg_store().await;
    let controller = Arc::new(JobController::new(store.clone()));

    let job = Job::new("uploads/race.png", JobPriority::Normal, None, Utc::now());
    store.insert(&job).await.unwrap();

    let claims: Vec<_> = (0..8)
        .map(|n| {
            let controller = controller.clone();
            tokio::spawn(async move { controller.claim(job.id, &format!("w{n}")).await })
        })
        .collect();

    let mut winners = 0;
    for claim in claims {
        if claim.await.unwrap().is_ok() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    // leave nothing in processing for the reaper test
    controller.fail(job.id, "race finished").await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_redis_pending_set_order_and_removal() {
    let queue = redis_queue();
    queue.health_check().await.unwrap();

    let now = Utc::now();
    let low = QueuedJob {
        job_id: Uuid::new_v4(),
        priority: JobPriority::Low,
        created_at: now,
    };
    let high = QueuedJob {
        job_id: Uuid::new_v4(),
        priority: JobPriority::High,
        created_at: now + chrono::Duration::seconds(1),
    };
    let dropped = QueuedJob {
        job_id: Uuid::new_v4(),
        priority: JobPriority::High,
        created_at: now,
    };

    queue.push(low.clone()).await.unwrap();
    queue.push(high.clone()).await.unwrap();
    queue.push(high.clone()).await.unwrap();
    queue.push(dropped.clone()).await.unwrap();
    assert!(queue.remove(dropped.job_id).await.unwrap());
    assert_eq!(queue.depth().await.unwrap(), 2);

    assert_eq!(queue.pop().await.unwrap(), Some(high.job_id));
    assert_eq!(queue.pop().await.unwrap(), Some(low.job_id));
    assert_eq!(queue.pop().await.unwrap(), None);
}

#[tokio::test]
#[ignore]
async fn test_shared_backends_dispatch_and_reclaim() {
    let store = pg_store().await;
    let controller = Arc::new(JobController::new(store));
    let dispatcher = Dispatcher::new(controller.clone(), redis_queue());

    let job = dispatcher.submit("uploads/shared.png", "low").await.unwrap();
    let next = dispatcher
        .wait_for_job(Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.id, job.id);

    controller.claim(job.id, "lost-worker").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let reclaimed = dispatcher
        .reclaim_stale(Duration::from_millis(10))
        .await
        .unwrap();
    assert!(reclaimed.contains(&job.id));

    let again = dispatcher.dequeue().await.unwrap().unwrap();
    assert_eq!(again.id, job.id);
    assert_eq!(again.status, JobStatus::Pending);
    assert!(dispatcher.cancel(job.id).await.unwrap());
}
