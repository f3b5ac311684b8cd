pub mod app;
pub mod auth;
pub mod routes;

pub use app::{build_router, AppState};
pub use auth::CurrentUser;
