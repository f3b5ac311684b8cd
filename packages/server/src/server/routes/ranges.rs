//! Range lifecycle endpoints: create, read, and job enqueueing.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::common::ApiError;
use crate::domains::audit;
use crate::domains::events::{data as events_data, EventLevel};
use crate::domains::ranges::{access, data as ranges_data, Range};
use crate::domains::templates::{
    data as templates_data, models as template_models, Definition, Port, RoomOptions, Service,
    Template,
};
use crate::domains::users;
use crate::kernel::jobs::{JobType, PgJobStore};
use crate::server::app::AppState;
use crate::server::auth::CurrentUser;

#[derive(Debug, Deserialize)]
pub struct CreateRangeRequest {
    #[serde(default)]
    pub team_id: i64,
    #[serde(default)]
    pub template_id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub room: Option<RoomOptions>,
    #[serde(default)]
    pub rooms: Vec<AdhocRoom>,
}

/// Inline room declaration for template-less range creation.
#[derive(Debug, Deserialize)]
pub struct AdhocRoom {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub network: String,
}

pub async fn list_ranges(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<Range>>, ApiError> {
    let ranges = ranges_data::list_for_user(&state.db, user.0.id).await?;
    Ok(Json(ranges))
}

pub async fn create_range(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateRangeRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if !users::is_team_member(&state.db, user.0.id, req.team_id).await? {
        return Err(ApiError::Forbidden("not in team".into()));
    }

    let template = resolve_template_for_range(&state, &req, user.0.id).await?;

    let active =
        ranges_data::count_active_for_team_template(&state.db, req.team_id, template.id).await?;
    if active >= i64::from(template.quota) {
        return Err(ApiError::Conflict("template quota exceeded".into()));
    }

    let name = if req.name.is_empty() {
        format!("range-{}", Utc::now().timestamp())
    } else {
        req.name.clone()
    };
    let range = ranges_data::create(&state.db, req.team_id, template.id, user.0.id, &name).await?;

    let jobs = PgJobStore::new(state.db.clone());
    let job = jobs
        .enqueue(range.id, range.team_id, JobType::Provision, &json!({}), user.0.id)
        .await?;
    let _ = events_data::insert(
        &state.db,
        range.id,
        Some(job.id),
        EventLevel::Info,
        "job.queued",
        "provision job queued",
        &json!({}),
    )
    .await;

    audit::log(
        &state.db,
        user.0.id,
        Some(range.team_id),
        Some(range.id),
        "range.create",
        json!({ "job_id": job.id }),
    )
    .await;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "range": range, "job": job })),
    ))
}

/// Either look up the requested template or synthesize a single-use one
/// from the inline room list.
async fn resolve_template_for_range(
    state: &AppState,
    req: &CreateRangeRequest,
    user_id: i64,
) -> Result<Template, ApiError> {
    if req.template_id > 0 {
        return templates_data::get_by_id(&state.db, req.template_id)
            .await?
            .ok_or_else(|| ApiError::bad_request("template not found"));
    }
    if req.rooms.is_empty() {
        return Err(ApiError::bad_request("template_id or rooms is required"));
    }

    let mut services = Vec::with_capacity(req.rooms.len());
    for (i, room) in req.rooms.iter().enumerate() {
        let name = room.name.trim();
        let image = room.image.trim();
        if image.is_empty() {
            return Err(ApiError::bad_request("room image is required"));
        }
        let network = room.network.trim();
        services.push(Service {
            name: if name.is_empty() {
                format!("room-{}", i + 1)
            } else {
                name.to_string()
            },
            image: image.to_string(),
            network: if network.is_empty() {
                "guest".to_string()
            } else {
                network.to_string()
            },
            exposed_ports: vec![
                Port {
                    container: 8080,
                    host: 0,
                    protocol: "tcp".into(),
                },
                Port {
                    container: 52000,
                    host: 0,
                    protocol: "udp".into(),
                },
            ],
            ..Default::default()
        });
    }

    let mut room = RoomOptions {
        user_pass: "neko".into(),
        admin_pass: "admin".into(),
        max_connections: 8,
        ..Default::default()
    };
    if let Some(requested) = &req.room {
        room = room.overlaid(requested);
    }

    let definition = Definition {
        name: format!("range-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default()),
        room,
        services,
    };
    let raw = serde_json::to_value(&definition)
        .map_err(|err| ApiError::BadRequest(format!("invalid room definition: {err}")))?;
    template_models::validate_definition(&raw)
        .map_err(|err| ApiError::BadRequest(format!("invalid room definition: {err}")))?;

    let template = templates_data::create(
        &state.db,
        &format!("adhoc-team-{}", req.team_id),
        &format!("Adhoc Team {} Range", req.team_id),
        "auto-generated from range rooms",
        &raw,
        1,
        user_id,
    )
    .await?;
    Ok(template)
}

pub async fn get_range(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let range = range_for_user(&state, id, user.0.id).await?;
    let resources = ranges_data::list_resources(&state.db, range.id).await?;
    let rooms = ranges_data::list_room_instances(&state.db, range.id).await?;
    let template_definition = templates_data::get_by_id(&state.db, range.template_id)
        .await?
        .map(|t| t.definition)
        .unwrap_or_else(|| json!({}));

    let viewer_hint = if user.0.name.trim().is_empty() {
        user.0.email.split('@').next().unwrap_or_default().to_string()
    } else {
        user.0.name.clone()
    };
    let links = access::build_access_links(
        range.id,
        &range.metadata,
        &template_definition,
        &rooms,
        &viewer_hint,
    );
    Ok(Json(json!({
        "range": range,
        "resources": resources,
        "rooms": rooms,
        "access": links,
    })))
}

pub async fn destroy_range(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    enqueue_action(state, user, id, JobType::Destroy).await
}

pub async fn reset_range(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    enqueue_action(state, user, id, JobType::Reset).await
}

async fn enqueue_action(
    state: AppState,
    user: CurrentUser,
    range_id: i64,
    action: JobType,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let range = range_for_user(&state, range_id, user.0.id).await?;

    let jobs = PgJobStore::new(state.db.clone());
    let job = jobs
        .enqueue(range.id, range.team_id, action, &json!({}), user.0.id)
        .await?;
    let _ = events_data::insert(
        &state.db,
        range.id,
        Some(job.id),
        EventLevel::Info,
        "job.queued",
        &format!("{action} job queued"),
        &json!({}),
    )
    .await;

    audit::log(
        &state.db,
        user.0.id,
        Some(range.team_id),
        Some(range.id),
        &format!("range.{action}"),
        json!({ "job_id": job.id }),
    )
    .await;
    let job = serde_json::to_value(&job).map_err(anyhow::Error::from)?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub(super) async fn range_for_user(
    state: &AppState,
    range_id: i64,
    user_id: i64,
) -> Result<Range, ApiError> {
    ranges_data::get_for_user(&state.db, range_id, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("range not found"))
}
