//! Route definitions for `/webhooks`. Authenticated by signature, not JWT.

use axum::routing::post;
use axum::Router;

use crate::handlers::webhooks;
use crate::state::AppState;

/// Routes mounted at `/webhooks`.
///
/// ```text
/// POST   /conversion       -> conversion_webhook
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/conversion", post(webhooks::conversion_webhook))
}
