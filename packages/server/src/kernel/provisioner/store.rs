//! Persistence boundary for the reconciliation worker.
//!
//! One thin trait keeps SQL out of the worker so scenario tests can run
//! against an in-memory stub. The Postgres implementation also hands out
//! per-range advisory leases that serialize same-range jobs across worker
//! processes.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use crate::domains::events::{data as events_data, EventLevel};
use crate::domains::ranges::models::RangeStatus;
use crate::domains::templates::RoomOptions;

/// A daemon resource recorded against a range after reconciliation.
#[derive(Debug, Clone)]
pub struct NewResource {
    pub resource_type: String,
    pub docker_id: String,
    pub service_name: String,
    pub metadata: serde_json::Value,
}

impl NewResource {
    pub fn network(docker_id: &str, segment: &str, name: &str) -> Self {
        Self {
            resource_type: "network".into(),
            docker_id: docker_id.into(),
            service_name: format!("network-{segment}"),
            metadata: serde_json::json!({ "name": name, "segment": segment }),
        }
    }

    pub fn container(docker_id: &str, service_name: &str, segment: &str, image: &str) -> Self {
        Self {
            resource_type: "container".into(),
            docker_id: docker_id.into(),
            service_name: service_name.into(),
            metadata: serde_json::json!({ "network": segment, "image": image }),
        }
    }
}

/// Exclusive hold on a range while a job converges it. Dropping the lease
/// without releasing is safe; the lock dies with its transaction.
#[async_trait]
pub trait RangeLease: Send {
    async fn release(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait ProvisionerStore: Send + Sync {
    async fn lock_range(&self, range_id: i64) -> Result<Box<dyn RangeLease>>;

    async fn update_range_status(
        &self,
        range_id: i64,
        status: RangeStatus,
        metadata: Option<&serde_json::Value>,
    ) -> Result<()>;

    /// The template id and definition blob backing a range.
    async fn get_range_template(&self, range_id: i64) -> Result<(i64, serde_json::Value)>;

    /// Per-service room option overrides users have saved for this range.
    async fn room_overrides(&self, range_id: i64) -> Result<HashMap<String, RoomOptions>>;

    /// Replace the full resource set for a range in one transaction.
    async fn replace_resources(&self, range_id: i64, resources: &[NewResource]) -> Result<()>;

    async fn insert_event(
        &self,
        range_id: i64,
        job_id: Option<i64>,
        level: EventLevel,
        kind: &str,
        message: &str,
        payload: serde_json::Value,
    ) -> Result<()>;
}

#[derive(Clone)]
pub struct PgProvisionerStore {
    pool: PgPool,
}

impl PgProvisionerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Advisory lock namespace for range leases; the second key is the range id
/// folded to 32 bits.
const RANGE_LOCK_CLASS: i32 = 0x0052_4E47;

struct PgRangeLease {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RangeLease for PgRangeLease {
    async fn release(self: Box<Self>) -> Result<()> {
        // Nothing was written under the lease; rolling back releases the
        // transaction-scoped advisory lock.
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl ProvisionerStore for PgProvisionerStore {
    async fn lock_range(&self, range_id: i64) -> Result<Box<dyn RangeLease>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
            .bind(RANGE_LOCK_CLASS)
            .bind((range_id & i32::MAX as i64) as i32)
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgRangeLease { tx }))
    }

    async fn update_range_status(
        &self,
        range_id: i64,
        status: RangeStatus,
        metadata: Option<&serde_json::Value>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ranges
            SET status = $2, metadata_json = COALESCE($3, metadata_json), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(range_id)
        .bind(status.as_str())
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_range_template(&self, range_id: i64) -> Result<(i64, serde_json::Value)> {
        let row = sqlx::query_as::<_, (i64, serde_json::Value)>(
            r#"
            SELECT t.id, t.definition_json
            FROM ranges r
            JOIN templates t ON t.id = r.template_id
            WHERE r.id = $1
            "#,
        )
        .bind(range_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn room_overrides(&self, range_id: i64) -> Result<HashMap<String, RoomOptions>> {
        let rows = sqlx::query_as::<_, (String, serde_json::Value)>(
            "SELECT service_name, settings_json FROM room_instances WHERE range_id = $1",
        )
        .bind(range_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(service, settings)| {
                let options = serde_json::from_value(settings).unwrap_or_default();
                (service, options)
            })
            .collect())
    }

    async fn replace_resources(&self, range_id: i64, resources: &[NewResource]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM range_resources WHERE range_id = $1")
            .bind(range_id)
            .execute(&mut *tx)
            .await?;
        for resource in resources {
            sqlx::query(
                r#"
                INSERT INTO range_resources (range_id, resource_type, docker_id, service_name, metadata_json)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (resource_type, docker_id) DO NOTHING
                "#,
            )
            .bind(range_id)
            .bind(&resource.resource_type)
            .bind(&resource.docker_id)
            .bind(&resource.service_name)
            .bind(&resource.metadata)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_event(
        &self,
        range_id: i64,
        job_id: Option<i64>,
        level: EventLevel,
        kind: &str,
        message: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        events_data::insert(&self.pool, range_id, job_id, level, kind, message, &payload).await?;
        Ok(())
    }
}
