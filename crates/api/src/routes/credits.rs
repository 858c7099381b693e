//! Route definitions for `/credits`.

use axum::routing::get;
use axum::Router;

use crate::handlers::credits;
use crate::state::AppState;

/// Routes mounted at `/credits`.
///
/// ```text
/// GET    /                 -> get_credits
/// GET    /transactions     -> list_transactions (?limit=)
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(credits::get_credits))
        .route("/transactions", get(credits::list_transactions))
}
