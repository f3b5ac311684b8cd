//! Liveness and identity endpoints.

use std::time::Duration;

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::server::app::AppState;
use crate::server::auth::CurrentUser;

pub async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    let ping = tokio::time::timeout(
        Duration::from_secs(2),
        sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&state.db),
    )
    .await;

    let db_ok = matches!(ping, Ok(Ok(1)));
    Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "db": if db_ok { "ok" } else { "error" },
    }))
}

pub async fn me(user: CurrentUser) -> Json<crate::domains::users::User> {
    Json(user.0)
}
