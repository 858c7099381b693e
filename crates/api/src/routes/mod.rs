pub mod admin;
pub mod conversions;
pub mod credits;
pub mod health;
pub mod status;
pub mod webhooks;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /conversions                                     upload (multipart), list
/// /conversions/{id}                                get, delete
/// /conversions/{id}/retry                          retry a failed conversion (POST)
///
/// /status/batch                                    batch status (?ids=a,b,c)
/// /status/{id}                                     status with progress
///
/// /credits                                         balance and tier limits
/// /credits/transactions                            audit trail, newest first
///
/// /webhooks/conversion                             processor callback (signed, no JWT)
///
/// /admin/users/{id}/credits/refill                 monthly refill (admin only)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/conversions", conversions::router())
        .nest("/status", status::router())
        .nest("/credits", credits::router())
        .nest("/webhooks", webhooks::router())
        .nest("/admin", admin::router())
}
