//! Template catalog endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::common::ApiError;
use crate::domains::templates::{data, models, Template};
use crate::domains::audit;
use crate::server::app::AppState;
use crate::server::auth::CurrentUser;

pub async fn list_templates(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Result<Json<Vec<Template>>, ApiError> {
    let templates = data::list(&state.db).await?;
    Ok(Json(templates))
}

pub async fn get_template(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Template>, ApiError> {
    let template = data::get_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("not found"))?;
    Ok(Json(template))
}

#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "definition_json")]
    pub definition: serde_json::Value,
    #[serde(default)]
    pub quota: i32,
}

pub async fn create_template(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateTemplateRequest>,
) -> Result<(StatusCode, Json<Template>), ApiError> {
    user.require_admin()?;
    if req.name.is_empty() || req.display_name.is_empty() {
        return Err(ApiError::bad_request("name and display_name required"));
    }
    let quota = if req.quota <= 0 { 1 } else { req.quota };
    models::validate_definition(&req.definition)
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;

    let template = data::create(
        &state.db,
        &req.name,
        &req.display_name,
        &req.description,
        &req.definition,
        quota,
        user.0.id,
    )
    .await?;

    audit::log(
        &state.db,
        user.0.id,
        None,
        None,
        "template.create",
        json!({ "template_id": template.id }),
    )
    .await;
    Ok((StatusCode::CREATED, Json(template)))
}
