//! Queue-safety properties against a real PostgreSQL.
//!
//! These need a database; set TEST_DATABASE_URL to run them, otherwise each
//! test skips. The schema is applied via the crate's own migrations.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use server_core::kernel::jobs::{JobQueue, JobType, PgJobStore};

/// Connect to TEST_DATABASE_URL and carve out a scratch database so claims
/// in parallel tests cannot see each other's jobs. Scratch databases are
/// left behind; point this at a throwaway server.
async fn test_pool() -> Option<PgPool> {
    let base_url = std::env::var("TEST_DATABASE_URL").ok()?;
    let admin = PgPoolOptions::new()
        .max_connections(1)
        .connect(&base_url)
        .await
        .ok()?;
    let db_name = format!("queue_test_{}", uuid::Uuid::new_v4().simple());
    sqlx::query(&format!(r#"CREATE DATABASE "{db_name}""#))
        .execute(&admin)
        .await
        .ok()?;

    let mut url = url::Url::parse(&base_url).ok()?;
    url.set_path(&db_name);
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(url.as_str())
        .await
        .ok()?;
    sqlx::migrate!("./migrations").run(&pool).await.ok()?;
    Some(pool)
}

struct Fixture {
    user_id: i64,
    team_id: i64,
    range_id: i64,
}

async fn fixture(pool: &PgPool) -> Fixture {
    let tag = uuid::Uuid::new_v4();
    let user_id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO users (email, name) VALUES ($1, 'queue test') RETURNING id",
    )
    .bind(format!("queue-{tag}@test.local"))
    .fetch_one(pool)
    .await
    .unwrap();
    let team_id =
        sqlx::query_scalar::<_, i64>("INSERT INTO teams (name) VALUES ($1) RETURNING id")
            .bind(format!("team-{tag}"))
            .fetch_one(pool)
            .await
            .unwrap();
    sqlx::query("INSERT INTO team_members (team_id, user_id) VALUES ($1, $2)")
        .bind(team_id)
        .bind(user_id)
        .execute(pool)
        .await
        .unwrap();
    let template_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO templates (name, version, display_name, definition_json, quota, created_by)
        VALUES ($1, 1, 'Queue Test', '{"name":"lab","services":[{"name":"web","image":"nginx"}]}', 1, $2)
        RETURNING id
        "#,
    )
    .bind(format!("tpl-{tag}"))
    .bind(user_id)
    .fetch_one(pool)
    .await
    .unwrap();
    let range_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO ranges (team_id, template_id, owner_user_id, name, status)
        VALUES ($1, $2, $3, $4, 'pending')
        RETURNING id
        "#,
    )
    .bind(team_id)
    .bind(template_id)
    .bind(user_id)
    .bind(format!("range-{tag}"))
    .fetch_one(pool)
    .await
    .unwrap();
    Fixture {
        user_id,
        team_id,
        range_id,
    }
}

async fn job_row(pool: &PgPool, job_id: i64) -> (String, i32, Option<String>) {
    sqlx::query_as::<_, (String, i32, Option<String>)>(
        "SELECT status, attempts, error FROM jobs WHERE id = $1",
    )
    .bind(job_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn concurrent_claims_never_share_a_job() {
    let Some(pool) = test_pool().await else {
        eprintln!("TEST_DATABASE_URL not set; skipping");
        return;
    };
    let fx = fixture(&pool).await;
    let store = Arc::new(PgJobStore::new(pool.clone()));
    let job = store
        .enqueue(fx.range_id, fx.team_id, JobType::Provision, &json!({}), fx.user_id)
        .await
        .unwrap();

    let mut claims = Vec::new();
    for i in 0..6 {
        let store = Arc::clone(&store);
        claims.push(tokio::spawn(async move {
            store.claim_next(&format!("worker-{i}")).await.unwrap()
        }));
    }
    let mut winners = 0;
    for claim in claims {
        if let Some(claimed) = claim.await.unwrap() {
            assert_eq!(claimed.id, job.id);
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one worker may win a claim");

    let (status, attempts, _) = job_row(&pool, job.id).await;
    assert_eq!(status, "running");
    assert_eq!(attempts, 1);
}

#[tokio::test]
async fn claims_follow_creation_order() {
    let Some(pool) = test_pool().await else {
        eprintln!("TEST_DATABASE_URL not set; skipping");
        return;
    };
    let fx = fixture(&pool).await;
    let store = PgJobStore::new(pool.clone());
    let first = store
        .enqueue(fx.range_id, fx.team_id, JobType::Provision, &json!({}), fx.user_id)
        .await
        .unwrap();
    let second = store
        .enqueue(fx.range_id, fx.team_id, JobType::Reset, &json!({}), fx.user_id)
        .await
        .unwrap();

    let a = store.claim_next("w1").await.unwrap().unwrap();
    let b = store.claim_next("w1").await.unwrap().unwrap();
    assert_eq!(a.id, first.id);
    assert_eq!(b.id, second.id);
    assert!(store.claim_next("w1").await.unwrap().is_none());
}

#[tokio::test]
async fn complete_and_fail_are_terminal() {
    let Some(pool) = test_pool().await else {
        eprintln!("TEST_DATABASE_URL not set; skipping");
        return;
    };
    let fx = fixture(&pool).await;
    let store = PgJobStore::new(pool.clone());

    let ok = store
        .enqueue(fx.range_id, fx.team_id, JobType::Provision, &json!({}), fx.user_id)
        .await
        .unwrap();
    store.claim_next("w1").await.unwrap().unwrap();
    store.complete(ok.id).await.unwrap();
    let (status, _, error) = job_row(&pool, ok.id).await;
    assert_eq!(status, "succeeded");
    assert!(error.is_none());

    let bad = store
        .enqueue(fx.range_id, fx.team_id, JobType::Destroy, &json!({}), fx.user_id)
        .await
        .unwrap();
    store.claim_next("w1").await.unwrap().unwrap();
    store.fail(bad.id, "pull image nginx: boom").await.unwrap();
    let (status, _, error) = job_row(&pool, bad.id).await;
    assert_eq!(status, "failed");
    assert_eq!(error.as_deref(), Some("pull image nginx: boom"));

    // Terminal jobs never come back out of the queue.
    assert!(store.claim_next("w1").await.unwrap().is_none());
}

#[tokio::test]
async fn reaper_requeues_stale_claims_until_attempts_run_out() {
    let Some(pool) = test_pool().await else {
        eprintln!("TEST_DATABASE_URL not set; skipping");
        return;
    };
    let fx = fixture(&pool).await;
    let store = PgJobStore::new(pool.clone());
    let job = store
        .enqueue(fx.range_id, fx.team_id, JobType::Provision, &json!({}), fx.user_id)
        .await
        .unwrap();

    // Worker claims, then "crashes": the row stays running. The short sleep
    // keeps locked_at strictly behind the reaper's NOW().
    store.claim_next("w1").await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let outcome = store.requeue_stale(Duration::ZERO).await.unwrap();
    assert_eq!(outcome.requeued, vec![job.id]);
    let (status, attempts, _) = job_row(&pool, job.id).await;
    assert_eq!(status, "queued");
    assert_eq!(attempts, 1);

    // Burn the remaining attempts the same way.
    store.claim_next("w1").await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    store.requeue_stale(Duration::ZERO).await.unwrap();
    store.claim_next("w1").await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let outcome = store.requeue_stale(Duration::ZERO).await.unwrap();
    assert_eq!(outcome.abandoned, vec![job.id]);
    let (status, attempts, error) = job_row(&pool, job.id).await;
    assert_eq!(status, "failed");
    assert_eq!(attempts, 3);
    assert_eq!(error.as_deref(), Some("abandoned"));
}

#[tokio::test]
async fn fresh_claims_are_not_reaped() {
    let Some(pool) = test_pool().await else {
        eprintln!("TEST_DATABASE_URL not set; skipping");
        return;
    };
    let fx = fixture(&pool).await;
    let store = PgJobStore::new(pool.clone());
    store
        .enqueue(fx.range_id, fx.team_id, JobType::Provision, &json!({}), fx.user_id)
        .await
        .unwrap();
    store.claim_next("w1").await.unwrap().unwrap();

    let outcome = store.requeue_stale(Duration::from_secs(600)).await.unwrap();
    assert!(outcome.requeued.is_empty());
    assert!(outcome.abandoned.is_empty());
}
