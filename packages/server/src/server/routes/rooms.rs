//! Room endpoints: settings overlay and direct container actions.
//!
//! start/stop/restart go straight to the daemon against the container the
//! worker recorded for the service; recreate tears the container down and
//! hands the rest to a reset job.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::common::ApiError;
use crate::domains::audit;
use crate::domains::events::{data as events_data, EventLevel};
use crate::domains::ranges::{data as ranges_data, Range, RoomInstance};
use crate::domains::templates::{data as templates_data, models as template_models, Definition, RoomOptions};
use crate::kernel::jobs::{JobType, PgJobStore};
use crate::server::app::AppState;
use crate::server::auth::CurrentUser;

use super::ranges::range_for_user;

/// Grace period handed to the daemon for stop/restart.
const STOP_GRACE_SECS: i64 = 15;

pub async fn list_rooms(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Vec<RoomInstance>>, ApiError> {
    let range = range_for_user(&state, id, user.0.id).await?;
    let rooms = ranges_data::list_room_instances(&state.db, range.id).await?;
    Ok(Json(rooms))
}

pub async fn get_room_settings(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((id, service)): Path<(i64, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let service = valid_service(&service)?;
    let range = range_for_user(&state, id, user.0.id).await?;

    if let Some(room) = ranges_data::get_room_instance(&state.db, range.id, service).await? {
        let room = serde_json::to_value(&room).map_err(anyhow::Error::from)?;
        return Ok(Json(room));
    }

    // No overlay saved yet: answer with the template's room options so the
    // settings form starts from the effective defaults.
    let template = templates_data::get_by_id(&state.db, range.template_id)
        .await?
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("template lookup failed")))?;
    let definition: Definition = serde_json::from_value(template.definition)
        .map_err(|err| ApiError::Internal(anyhow::anyhow!("template parse failed: {err}")))?;
    Ok(Json(json!({
        "range_id": range.id,
        "team_id": range.team_id,
        "service_name": service,
        "status": "pending",
        "entry_path": entry_path(range.id, service),
        "settings_json": definition.room,
    })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoomSettingsRequest {
    #[serde(default)]
    pub room: RoomOptions,
    #[serde(default)]
    pub reconcile: Option<bool>,
}

pub async fn update_room_settings(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((id, service)): Path<(i64, String)>,
    Json(req): Json<UpdateRoomSettingsRequest>,
) -> Result<Json<RoomInstance>, ApiError> {
    let service = valid_service(&service)?;
    let range = range_for_user(&state, id, user.0.id).await?;
    template_models::validate_room_options(&req.room)
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;

    let settings = serde_json::to_value(&req.room).map_err(anyhow::Error::from)?;
    let room = ranges_data::upsert_room_instance(
        &state.db,
        range.id,
        range.team_id,
        service,
        "running",
        &entry_path(range.id, service),
        &settings,
    )
    .await?;

    if req.reconcile.unwrap_or(true) {
        let jobs = PgJobStore::new(state.db.clone());
        if let Ok(job) = jobs
            .enqueue(
                range.id,
                range.team_id,
                JobType::Reset,
                &json!({ "source": "room.settings.update" }),
                user.0.id,
            )
            .await
        {
            let _ = events_data::insert(
                &state.db,
                range.id,
                Some(job.id),
                EventLevel::Info,
                "room.settings.update",
                "room settings updated, reset queued",
                &json!({}),
            )
            .await;
        }
    }

    audit::log(
        &state.db,
        user.0.id,
        Some(range.team_id),
        Some(range.id),
        "room.settings.update",
        json!({ "service_name": service }),
    )
    .await;
    Ok(Json(room))
}

pub async fn start_room(
    state: State<AppState>,
    user: CurrentUser,
    path: Path<(i64, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    room_container_action(state, user, path, "start").await
}

pub async fn stop_room(
    state: State<AppState>,
    user: CurrentUser,
    path: Path<(i64, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    room_container_action(state, user, path, "stop").await
}

pub async fn restart_room(
    state: State<AppState>,
    user: CurrentUser,
    path: Path<(i64, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    room_container_action(state, user, path, "restart").await
}

async fn room_container_action(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((id, service)): Path<(i64, String)>,
    action: &'static str,
) -> Result<Json<serde_json::Value>, ApiError> {
    let service = valid_service(&service)?;
    let range = range_for_user(&state, id, user.0.id).await?;
    let container_id = service_container(&state, &range, service).await?;

    let result = match action {
        "start" => state.runtime.start_container(&container_id).await,
        "stop" => state.runtime.stop_container(&container_id, STOP_GRACE_SECS).await,
        "restart" => {
            state
                .runtime
                .restart_container(&container_id, STOP_GRACE_SECS)
                .await
        }
        _ => Err(anyhow::anyhow!("unsupported action")),
    };
    if let Err(err) = result {
        // "already started/stopped" comes back as success from the runtime
        // adapter; anything surfacing here is a real daemon failure.
        return Err(ApiError::Upstream(format!("container action failed: {err:#}")));
    }

    let status = if action == "stop" { "stopped" } else { "running" };
    let settings = ranges_data::get_room_instance(&state.db, range.id, service)
        .await?
        .map(|room| room.settings)
        .unwrap_or_else(|| json!({}));
    let _ = ranges_data::upsert_room_instance(
        &state.db,
        range.id,
        range.team_id,
        service,
        status,
        &entry_path(range.id, service),
        &settings,
    )
    .await;
    let _ = events_data::insert(
        &state.db,
        range.id,
        None,
        EventLevel::Info,
        &format!("room.{action}"),
        &format!("room {action} requested"),
        &json!({}),
    )
    .await;
    Ok(Json(json!({ "status": status })))
}

pub async fn recreate_room(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((id, service)): Path<(i64, String)>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let service = valid_service(&service)?;
    let range = range_for_user(&state, id, user.0.id).await?;
    let container_id = service_container(&state, &range, service).await?;

    // Removal failures do not block the reset; the destroy phase matches by
    // label and will catch stragglers.
    let _ = state.runtime.remove_container(&container_id).await;

    let jobs = PgJobStore::new(state.db.clone());
    let job = jobs
        .enqueue(
            range.id,
            range.team_id,
            JobType::Reset,
            &json!({ "source": "room.recreate" }),
            user.0.id,
        )
        .await?;
    let _ = events_data::insert(
        &state.db,
        range.id,
        Some(job.id),
        EventLevel::Info,
        "room.recreate",
        "room recreate requested",
        &json!({}),
    )
    .await;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "queued", "job_id": job.id })),
    ))
}

fn valid_service(service: &str) -> Result<&str, ApiError> {
    let service = service.trim();
    if service.is_empty() {
        Err(ApiError::bad_request("invalid service"))
    } else {
        Ok(service)
    }
}

fn entry_path(range_id: i64, service: &str) -> String {
    format!(
        "/api/ranges/{}/access/{}/",
        range_id,
        urlencoding::encode(service)
    )
}

async fn service_container(
    state: &AppState,
    range: &Range,
    service: &str,
) -> Result<String, ApiError> {
    ranges_data::find_service_container(&state.db, range.id, service)
        .await?
        .ok_or_else(|| ApiError::not_found("room service not found"))
}
