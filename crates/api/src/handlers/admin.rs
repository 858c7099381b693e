//! Admin-only credit management.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use sheetflow_core::types::DbId;

use crate::error::AppResult;
use crate::middleware::rbac::RequireAdmin;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RefillResponse {
    pub user_id: DbId,
    pub credits: i32,
}

/// POST /api/v1/admin/users/{id}/credits/refill
///
/// Restores the user's balance to their tier allotment. Balances at or
/// above the allotment are returned unchanged.
pub async fn refill_credits(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
    Path(user_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let credits = state.service.ledger().refill(user_id).await?;

    tracing::info!(
        admin_id = admin.user_id,
        user_id,
        credits,
        "Credits refilled",
    );

    Ok(Json(DataResponse {
        data: RefillResponse { user_id, credits },
    }))
}
