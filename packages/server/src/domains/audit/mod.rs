//! Append-only audit trail of control-plane mutations. Independent of the
//! range event log; failures are logged and never bubble into handlers.

use sqlx::PgPool;

pub async fn log(
    pool: &PgPool,
    actor_user_id: i64,
    team_id: Option<i64>,
    range_id: Option<i64>,
    action: &str,
    details: serde_json::Value,
) {
    let result = sqlx::query(
        r#"
        INSERT INTO audit_log (actor_user_id, team_id, range_id, action, details_json)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(actor_user_id)
    .bind(team_id)
    .bind(range_id)
    .bind(action)
    .bind(details)
    .execute(pool)
    .await;

    if let Err(err) = result {
        tracing::warn!(action, error = %err, "audit log write failed");
    }
}
