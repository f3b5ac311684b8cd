//! Template catalog queries.

use anyhow::Result;
use sqlx::PgPool;

use super::models::Template;

pub async fn list(pool: &PgPool) -> Result<Vec<Template>> {
    let templates = sqlx::query_as::<_, Template>(
        r#"
        SELECT id, name, version, display_name, description, definition_json, quota, created_by, created_at
        FROM templates
        ORDER BY created_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(templates)
}

pub async fn get_by_id(pool: &PgPool, id: i64) -> Result<Option<Template>> {
    let template = sqlx::query_as::<_, Template>(
        r#"
        SELECT id, name, version, display_name, description, definition_json, quota, created_by, created_at
        FROM templates
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(template)
}

/// Insert the next version for `name`. The version is computed inside the
/// insert so concurrent creates for the same name cannot hand out the same
/// number unseen; the (name, version) unique constraint backstops it.
pub async fn create(
    pool: &PgPool,
    name: &str,
    display_name: &str,
    description: &str,
    definition: &serde_json::Value,
    quota: i32,
    created_by: i64,
) -> Result<Template> {
    let template = sqlx::query_as::<_, Template>(
        r#"
        INSERT INTO templates (name, version, display_name, description, definition_json, quota, created_by)
        SELECT $1, COALESCE(MAX(version), 0) + 1, $2, $3, $4, $5, $6
        FROM templates
        WHERE name = $1
        RETURNING id, name, version, display_name, description, definition_json, quota, created_by, created_at
        "#,
    )
    .bind(name)
    .bind(display_name)
    .bind(description)
    .bind(definition)
    .bind(quota)
    .bind(created_by)
    .fetch_one(pool)
    .await?;
    Ok(template)
}
