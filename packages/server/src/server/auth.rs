//! Request identity.
//!
//! The OIDC login flow lives outside this service; requests arrive with the
//! authenticated address in `x-auth-email` (set by the fronting proxy), or
//! fall back to `DEV_AUTH_EMAIL` for local development. Users are
//! auto-provisioned on first sight, with the admin role granted to
//! addresses on the deploy's admin list.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::common::ApiError;
use crate::domains::users::{self, User, ROLE_ADMIN, ROLE_MEMBER};

use super::app::AppState;

const AUTH_EMAIL_HEADER: &str = "x-auth-email";

#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl CurrentUser {
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.0.is_admin() {
            Ok(())
        } else {
            Err(ApiError::Forbidden("admin role required".into()))
        }
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header_email = parts
            .headers
            .get(AUTH_EMAIL_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_lowercase())
            .filter(|value| !value.is_empty());

        let email = header_email
            .or_else(|| state.config.dev_auth_email.clone().map(|e| e.to_lowercase()))
            .ok_or(ApiError::Unauthorized)?;

        let role = if state.config.admin_emails.contains(&email) {
            ROLE_ADMIN
        } else {
            ROLE_MEMBER
        };
        let name = email.split('@').next().unwrap_or_default().to_string();
        let user = users::ensure_user(&state.db, &email, &name, role).await?;
        Ok(CurrentUser(user))
    }
}
