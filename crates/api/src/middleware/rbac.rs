//! Admin-only endpoints.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use sheetflow_core::error::CoreError;

use super::auth::AuthUser;
use crate::auth::jwt::Role;
use crate::error::AppError;
use crate::state::AppState;

/// An [`AuthUser`] holding [`Role::Admin`]. Any other caller gets 403.
pub struct RequireAdmin(pub AuthUser);

impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let caller = AuthUser::from_request_parts(parts, state).await?;
        match caller.role {
            Role::Admin => Ok(RequireAdmin(caller)),
            Role::User => {
                tracing::warn!(user_id = caller.user_id, "Non-admin called an admin endpoint");
                Err(CoreError::Forbidden("Admin role required".into()).into())
            }
        }
    }
}
