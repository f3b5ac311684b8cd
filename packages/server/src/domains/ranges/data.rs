//! Range registry queries: ranges, their resources, and room instances.
//!
//! All reads for regular users go through the team-membership join; handlers
//! never look up a range without proving the caller shares its team.

use anyhow::Result;
use sqlx::PgPool;

use super::models::{Range, RangeResource, RoomInstance};

pub async fn create(
    pool: &PgPool,
    team_id: i64,
    template_id: i64,
    owner_user_id: i64,
    name: &str,
) -> Result<Range> {
    let range = sqlx::query_as::<_, Range>(
        r#"
        INSERT INTO ranges (team_id, template_id, owner_user_id, name, status, metadata_json)
        VALUES ($1, $2, $3, $4, 'pending', '{"ports":{}}')
        RETURNING id, team_id, template_id, owner_user_id, name, status, metadata_json, created_at, updated_at
        "#,
    )
    .bind(team_id)
    .bind(template_id)
    .bind(owner_user_id)
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(range)
}

pub async fn list_for_user(pool: &PgPool, user_id: i64) -> Result<Vec<Range>> {
    let ranges = sqlx::query_as::<_, Range>(
        r#"
        SELECT r.id, r.team_id, r.template_id, r.owner_user_id, r.name, r.status, r.metadata_json,
               r.created_at, r.updated_at
        FROM ranges r
        JOIN team_members tm ON tm.team_id = r.team_id
        WHERE tm.user_id = $1
        ORDER BY r.created_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(ranges)
}

pub async fn get_for_user(pool: &PgPool, id: i64, user_id: i64) -> Result<Option<Range>> {
    let range = sqlx::query_as::<_, Range>(
        r#"
        SELECT r.id, r.team_id, r.template_id, r.owner_user_id, r.name, r.status, r.metadata_json,
               r.created_at, r.updated_at
        FROM ranges r
        JOIN team_members tm ON tm.team_id = r.team_id
        WHERE r.id = $1 AND tm.user_id = $2
        "#,
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(range)
}

/// Ranges still holding (or about to hold) daemon resources count against
/// the template quota.
pub async fn count_active_for_team_template(
    pool: &PgPool,
    team_id: i64,
    template_id: i64,
) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)::bigint
        FROM ranges
        WHERE team_id = $1 AND template_id = $2
          AND status IN ('pending', 'provisioning', 'ready', 'destroying')
        "#,
    )
    .bind(team_id)
    .bind(template_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn list_resources(pool: &PgPool, range_id: i64) -> Result<Vec<RangeResource>> {
    let resources = sqlx::query_as::<_, RangeResource>(
        r#"
        SELECT resource_type, docker_id, COALESCE(service_name, '') AS service_name, metadata_json
        FROM range_resources
        WHERE range_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(range_id)
    .fetch_all(pool)
    .await?;
    Ok(resources)
}

/// The container backing a named service, if the worker has recorded one.
pub async fn find_service_container(
    pool: &PgPool,
    range_id: i64,
    service_name: &str,
) -> Result<Option<String>> {
    let docker_id = sqlx::query_scalar::<_, String>(
        r#"
        SELECT docker_id
        FROM range_resources
        WHERE range_id = $1 AND resource_type = 'container' AND service_name = $2 AND docker_id <> ''
        ORDER BY id ASC
        LIMIT 1
        "#,
    )
    .bind(range_id)
    .bind(service_name)
    .fetch_optional(pool)
    .await?;
    Ok(docker_id)
}

pub async fn list_room_instances(pool: &PgPool, range_id: i64) -> Result<Vec<RoomInstance>> {
    let rooms = sqlx::query_as::<_, RoomInstance>(
        r#"
        SELECT range_id, team_id, service_name, status, entry_path, settings_json, updated_at
        FROM room_instances
        WHERE range_id = $1
        ORDER BY service_name ASC
        "#,
    )
    .bind(range_id)
    .fetch_all(pool)
    .await?;
    Ok(rooms)
}

pub async fn get_room_instance(
    pool: &PgPool,
    range_id: i64,
    service_name: &str,
) -> Result<Option<RoomInstance>> {
    let room = sqlx::query_as::<_, RoomInstance>(
        r#"
        SELECT range_id, team_id, service_name, status, entry_path, settings_json, updated_at
        FROM room_instances
        WHERE range_id = $1 AND service_name = $2
        "#,
    )
    .bind(range_id)
    .bind(service_name)
    .fetch_optional(pool)
    .await?;
    Ok(room)
}

pub async fn upsert_room_instance(
    pool: &PgPool,
    range_id: i64,
    team_id: i64,
    service_name: &str,
    status: &str,
    entry_path: &str,
    settings: &serde_json::Value,
) -> Result<RoomInstance> {
    let room = sqlx::query_as::<_, RoomInstance>(
        r#"
        INSERT INTO room_instances (range_id, team_id, service_name, status, entry_path, settings_json)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (range_id, service_name) DO UPDATE SET
            status = EXCLUDED.status,
            entry_path = EXCLUDED.entry_path,
            settings_json = EXCLUDED.settings_json,
            updated_at = NOW()
        RETURNING range_id, team_id, service_name, status, entry_path, settings_json, updated_at
        "#,
    )
    .bind(range_id)
    .bind(team_id)
    .bind(service_name)
    .bind(status)
    .bind(entry_path)
    .bind(settings)
    .fetch_one(pool)
    .await?;
    Ok(room)
}
