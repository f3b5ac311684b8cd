//! Event log queries and the store handle the event stream polls through.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

use super::models::{Event, EventLevel};

/// Read side of the event log, as the SSE stream consumes it. Split out as a
/// trait so stream tests can run against a stub.
#[async_trait]
pub trait EventFeed: Send + Sync {
    /// The most recent `limit` events for a range, newest first.
    async fn recent(&self, range_id: i64, limit: i64) -> Result<Vec<Event>>;

    /// Events with `id > after_id`, ascending.
    async fn after(&self, range_id: i64, after_id: i64) -> Result<Vec<Event>>;
}

#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub async fn insert(
    pool: &PgPool,
    range_id: i64,
    job_id: Option<i64>,
    level: EventLevel,
    kind: &str,
    message: &str,
    payload: &serde_json::Value,
) -> Result<Event> {
    let event = sqlx::query_as::<_, Event>(
        r#"
        INSERT INTO events (range_id, job_id, level, kind, message, payload_json)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, range_id, job_id, level, kind, message, payload_json, created_at
        "#,
    )
    .bind(range_id)
    .bind(job_id)
    .bind(level.as_str())
    .bind(kind)
    .bind(message)
    .bind(payload)
    .fetch_one(pool)
    .await?;
    Ok(event)
}

#[async_trait]
impl EventFeed for PgEventStore {
    async fn recent(&self, range_id: i64, limit: i64) -> Result<Vec<Event>> {
        let events = sqlx::query_as::<_, Event>(
            r#"
            SELECT id, range_id, job_id, level, kind, message, payload_json, created_at
            FROM events
            WHERE range_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(range_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    async fn after(&self, range_id: i64, after_id: i64) -> Result<Vec<Event>> {
        let events = sqlx::query_as::<_, Event>(
            r#"
            SELECT id, range_id, job_id, level, kind, message, payload_json, created_at
            FROM events
            WHERE range_id = $1 AND id > $2
            ORDER BY id ASC
            "#,
        )
        .bind(range_id)
        .bind(after_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }
}
