//! Route definitions for `/status`.

use axum::routing::get;
use axum::Router;

use crate::handlers::status;
use crate::state::AppState;

/// Routes mounted at `/status`.
///
/// ```text
/// GET    /batch            -> batch_status (?ids=a,b,c)
/// GET    /{id}             -> get_status
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/batch", get(status::batch_status))
        .route("/{id}", get(status::get_status))
}
