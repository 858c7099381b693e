//! Handlers for the caller's credit balance.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use sheetflow_core::status::SubscriptionTier;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::query::LimitParams;
use crate::response::DataResponse;
use crate::state::AppState;

/// Default and maximum number of audit rows returned.
const DEFAULT_HISTORY_LIMIT: i64 = 20;
const MAX_HISTORY_LIMIT: i64 = 100;

#[derive(Debug, Serialize)]
pub struct CreditsResponse {
    pub credits: i32,
    pub tier: SubscriptionTier,
    pub monthly_credits: i32,
    pub has_credits: bool,
    pub max_file_size_bytes: i64,
}

/// GET /api/v1/credits
///
/// Opens the account with the free allotment on first access.
pub async fn get_credits(
    auth: AuthUser,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let limits = state.service.ledger().check_limits(auth.user_id).await?;
    Ok(Json(DataResponse {
        data: CreditsResponse {
            credits: limits.credits,
            tier: limits.tier,
            monthly_credits: limits.tier.monthly_credits(),
            has_credits: limits.has_credits,
            max_file_size_bytes: limits.max_file_size_bytes,
        },
    }))
}

/// GET /api/v1/credits/transactions?limit=
///
/// Newest first.
pub async fn list_transactions(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> AppResult<impl IntoResponse> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let history = state.service.ledger().history(auth.user_id, limit).await?;
    Ok(Json(DataResponse { data: history }))
}
