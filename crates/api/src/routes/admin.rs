//! Route definitions for the `/admin` resource.

use axum::routing::post;
use axum::Router;

use crate::handlers::admin;
use crate::state::AppState;

/// Routes mounted at `/admin`.
///
/// All routes require the `admin` role (enforced by handler extractors).
///
/// ```text
/// POST   /users/{id}/credits/refill -> refill_credits
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/users/{id}/credits/refill", post(admin::refill_credits))
}
