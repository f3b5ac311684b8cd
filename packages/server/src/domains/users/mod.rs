//! Users and team membership.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

pub const ROLE_MEMBER: &str = "member";
pub const ROLE_ADMIN: &str = "admin";

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

pub async fn get_by_email(pool: &PgPool, email: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, email, name, role, created_at, updated_at FROM users WHERE email = $1",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

/// Fetch-or-create by email, promoting the role to admin when the deploy's
/// admin list says so.
pub async fn ensure_user(pool: &PgPool, email: &str, name: &str, role: &str) -> Result<User> {
    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, name, role)
        VALUES ($1, $2, $3)
        ON CONFLICT (email) DO UPDATE SET
            role = EXCLUDED.role,
            updated_at = NOW()
        RETURNING id, email, name, role, created_at, updated_at
        "#,
    )
    .bind(email)
    .bind(name)
    .bind(role)
    .fetch_one(pool)
    .await?;
    Ok(user)
}

pub async fn is_team_member(pool: &PgPool, user_id: i64, team_id: i64) -> Result<bool> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM team_members WHERE user_id = $1 AND team_id = $2)",
    )
    .bind(user_id)
    .bind(team_id)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}
