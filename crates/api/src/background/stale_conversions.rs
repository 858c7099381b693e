//! Periodic sweep of conversions stuck in `processing`.
//!
//! A conversion whose webhook never arrives would otherwise hold the
//! user's credit forever. Each sweep fails conversions older than the
//! configured window with a timeout message and refunds the credit. It
//! also retries refunds that earlier failures could not pay.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sheetflow_core::lifecycle::ConversionService;
use tokio_util::sync::CancellationToken;

/// How often the sweep runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Run the stale-conversion sweep loop until `cancel` is triggered.
pub async fn run(service: Arc<ConversionService>, stale_after_mins: i64, cancel: CancellationToken) {
    run_every(service, stale_after_mins, SWEEP_INTERVAL, cancel).await;
}

/// Same as [`run`] with a configurable tick.
pub async fn run_every(
    service: Arc<ConversionService>,
    stale_after_mins: i64,
    every: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        stale_after_mins,
        interval_secs = every.as_secs(),
        "Stale conversion sweep started"
    );

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Stale conversion sweep stopping");
                break;
            }
            _ = interval.tick() => {
                let cutoff = Utc::now() - chrono::Duration::minutes(stale_after_mins);
                match service.fail_stale(cutoff).await {
                    Ok(0) => tracing::debug!("Stale conversion sweep: nothing to fail"),
                    Ok(failed) => tracing::warn!(failed, "Stale conversion sweep: timed out conversions"),
                    Err(e) => tracing::error!(error = %e, "Stale conversion sweep failed"),
                }
            }
        }
    }
}
