//! Status polling endpoints with computed progress.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use sheetflow_core::types::ConversionId;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::query::BatchIdsParams;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/status/{id}
pub async fn get_status(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<ConversionId>,
) -> AppResult<impl IntoResponse> {
    let snapshot = state.service.snapshot(auth.user_id, id, Utc::now()).await?;
    Ok(Json(DataResponse { data: snapshot }))
}

/// GET /api/v1/status/batch?ids=a,b,c
///
/// Unknown ids and other users' conversions are omitted from the result.
pub async fn batch_status(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<BatchIdsParams>,
) -> AppResult<impl IntoResponse> {
    let ids = params.parse()?;
    let snapshots = state
        .service
        .snapshots(auth.user_id, &ids, Utc::now())
        .await?;
    Ok(Json(DataResponse { data: snapshots }))
}
