//! Processor callback endpoint.
//!
//! Not behind [`AuthUser`](crate::middleware::auth::AuthUser): the sender
//! authenticates with an HMAC signature over the raw body, so the body is
//! taken as bytes and verified before it is parsed.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use sheetflow_core::error::CoreError;
use sheetflow_core::webhook::SIGNATURE_HEADER;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// POST /api/v1/webhooks/conversion
///
/// Replies `{"success": true}` for first deliveries and duplicates alike.
pub async fn conversion_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let ack = state
        .webhook
        .handle(&body, signature)
        .await
        .map_err(for_sender)?;

    if ack.duplicate {
        tracing::debug!(conversion_id = %ack.conversion_id, "Duplicate webhook acknowledged");
    } else {
        tracing::info!(conversion_id = %ack.conversion_id, "Webhook applied");
    }

    Ok(Json(ack))
}

/// Senders only redeliver on 500, so a lost status race must not surface
/// as 409.
fn for_sender(err: CoreError) -> AppError {
    match err {
        CoreError::ConcurrentModification { entity, id } => {
            AppError::InternalError(format!("{entity} {id} changed while applying webhook"))
        }
        other => AppError::Core(other),
    }
}
