use std::sync::Arc;

use sheetflow_core::lifecycle::ConversionService;
use sheetflow_core::webhook::WebhookIngress;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything is behind `Arc` or already `Clone`.
#[derive(Clone)]
pub struct AppState {
    /// Database pool, absent when running on the in-memory stores.
    pub pool: Option<sqlx::PgPool>,
    pub config: Arc<ServerConfig>,
    /// Conversion state machine and credit ledger.
    pub service: Arc<ConversionService>,
    /// Authenticated processor callbacks.
    pub webhook: Arc<WebhookIngress>,
}
