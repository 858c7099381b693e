//! Route definitions for the `/conversions` resource.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use sheetflow_core::status::SubscriptionTier;

use crate::handlers::conversions;
use crate::state::AppState;

/// Room for multipart framing on top of the largest accepted file.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Largest request body accepted on upload routes. Per-tier limits are
/// enforced by the service after the body is read.
pub fn upload_body_limit() -> usize {
    SubscriptionTier::Business.max_file_size_bytes() as usize + MULTIPART_OVERHEAD_BYTES
}

/// Routes mounted at `/conversions`.
///
/// ```text
/// POST   /                 -> create_conversion (multipart: file, document_type)
/// GET    /                 -> list_conversions (?limit=)
/// GET    /{id}             -> get_conversion
/// DELETE /{id}             -> delete_conversion
/// POST   /{id}/retry       -> retry_conversion
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            post(conversions::create_conversion)
                .get(conversions::list_conversions)
                .layer(DefaultBodyLimit::max(upload_body_limit())),
        )
        .route(
            "/{id}",
            get(conversions::get_conversion).delete(conversions::delete_conversion),
        )
        .route("/{id}/retry", post(conversions::retry_conversion))
}
