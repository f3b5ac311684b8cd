//! Application state and router assembly.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::kernel::runtime::ContainerRuntime;

use super::routes;

/// Shared handler dependencies, constructed once at process start: the
/// connection pool, the daemon client, and the configuration snapshot.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub runtime: Arc<dyn ContainerRuntime>,
}

impl AppState {
    pub fn new(db: PgPool, config: Config, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            db,
            config: Arc::new(config),
            runtime,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/me", get(routes::me))
        .route("/templates", get(routes::list_templates).post(routes::create_template))
        .route("/templates/:id", get(routes::get_template))
        .route("/ranges", get(routes::list_ranges).post(routes::create_range))
        .route("/ranges/:id", get(routes::get_range))
        .route("/ranges/:id/destroy", post(routes::destroy_range))
        .route("/ranges/:id/reset", post(routes::reset_range))
        .route("/ranges/:id/events", get(routes::stream_range_events))
        .route("/ranges/:id/rooms", get(routes::list_rooms))
        .route(
            "/ranges/:id/rooms/:service",
            get(routes::get_room_settings).put(routes::update_room_settings),
        )
        .route("/ranges/:id/rooms/:service/start", post(routes::start_room))
        .route("/ranges/:id/rooms/:service/stop", post(routes::stop_room))
        .route("/ranges/:id/rooms/:service/restart", post(routes::restart_room))
        .route("/ranges/:id/rooms/:service/recreate", post(routes::recreate_room));

    Router::new()
        .route("/healthz", get(routes::healthz))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
