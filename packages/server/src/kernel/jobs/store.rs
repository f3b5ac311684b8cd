//! PostgreSQL-backed job queue.
//!
//! The claim query is the concurrency story: `FOR UPDATE SKIP LOCKED` lets N
//! worker processes pull disjoint jobs with no coordination, and an
//! uncommitted claim releases on transaction abort, so a crash between
//! select and update leaks nothing.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

use super::job::{ClaimedJob, Job, JobType};

const CLAIM_NEXT_JOB_SQL: &str = r#"
WITH next_job AS (
    SELECT id FROM jobs
    WHERE status = 'queued' AND attempts < max_attempts
    ORDER BY created_at, id
    FOR UPDATE SKIP LOCKED
    LIMIT 1
)
UPDATE jobs j
SET status = 'running', locked_by = $1, locked_at = NOW(), attempts = attempts + 1, updated_at = NOW()
FROM next_job
WHERE j.id = next_job.id
RETURNING j.id, j.range_id, j.team_id, j.job_type, j.payload_json, j.attempts
"#;

/// Queue operations the worker loop consumes.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Claim the oldest queued job with attempts remaining, or `None` when
    /// the queue is empty. Exactly one concurrent caller wins any given job.
    async fn claim_next(&self, worker_id: &str) -> Result<Option<ClaimedJob>>;

    /// Terminal success.
    async fn complete(&self, job_id: i64) -> Result<()>;

    /// Terminal failure with the error preserved on the row.
    async fn fail(&self, job_id: i64, error: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

/// What one reaper pass did to stale `running` jobs.
#[derive(Debug, Default, Clone)]
pub struct ReapOutcome {
    pub requeued: Vec<i64>,
    pub abandoned: Vec<i64>,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn enqueue(
        &self,
        range_id: i64,
        team_id: i64,
        job_type: JobType,
        payload: &serde_json::Value,
        created_by: i64,
    ) -> Result<Job> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (range_id, team_id, job_type, status, payload_json, created_by)
            VALUES ($1, $2, $3, 'queued', $4, $5)
            RETURNING id, range_id, team_id, job_type, status, payload_json, attempts, max_attempts,
                      locked_by, locked_at, error, created_by, created_at, updated_at
            "#,
        )
        .bind(range_id)
        .bind(team_id)
        .bind(job_type.as_str())
        .bind(payload)
        .bind(created_by)
        .fetch_one(&self.pool)
        .await?;
        Ok(job)
    }

    /// Hand stale `running` jobs back to the queue. A worker that died
    /// mid-job leaves the row in `running` with `attempts` already counted;
    /// once `locked_at` ages past the stale cutoff the job either requeues
    /// (attempts remain) or fails as abandoned.
    pub async fn requeue_stale(&self, older_than: std::time::Duration) -> Result<ReapOutcome> {
        let cutoff_ms = older_than.as_millis().to_string();
        let mut tx = self.pool.begin().await?;

        let requeued = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE jobs
            SET status = 'queued', locked_by = NULL, locked_at = NULL, updated_at = NOW()
            WHERE status = 'running'
              AND locked_at < NOW() - ($1 || ' milliseconds')::INTERVAL
              AND attempts < max_attempts
            RETURNING id
            "#,
        )
        .bind(&cutoff_ms)
        .fetch_all(&mut *tx)
        .await?;

        let abandoned = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE jobs
            SET status = 'failed', error = 'abandoned', updated_at = NOW()
            WHERE status = 'running'
              AND locked_at < NOW() - ($1 || ' milliseconds')::INTERVAL
              AND attempts >= max_attempts
            RETURNING id
            "#,
        )
        .bind(&cutoff_ms)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ReapOutcome {
            requeued,
            abandoned,
        })
    }
}

#[async_trait]
impl JobQueue for PgJobStore {
    async fn claim_next(&self, worker_id: &str) -> Result<Option<ClaimedJob>> {
        let mut tx = self.pool.begin().await?;
        let claimed = sqlx::query_as::<_, ClaimedJob>(CLAIM_NEXT_JOB_SQL)
            .bind(worker_id)
            .fetch_optional(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(claimed)
    }

    async fn complete(&self, job_id: i64) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = 'succeeded', error = NULL, updated_at = NOW() WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fail(&self, job_id: i64, error: &str) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = 'failed', error = $2, updated_at = NOW() WHERE id = $1")
            .bind(job_id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_sql_is_crash_safe() {
        let sql = CLAIM_NEXT_JOB_SQL.to_uppercase();
        assert!(sql.contains("FOR UPDATE SKIP LOCKED"));
        assert!(sql.contains("ATTEMPTS = ATTEMPTS + 1"));
        assert!(sql.contains("ATTEMPTS < MAX_ATTEMPTS"));
        assert!(sql.contains("STATUS = 'RUNNING'"));
    }
}
