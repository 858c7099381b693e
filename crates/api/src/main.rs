use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sheetflow_core::ledger::Ledger;
use sheetflow_core::lifecycle::{ConversionService, ServiceDeps};
use sheetflow_core::store::ConversionProcessor;
use sheetflow_core::webhook::WebhookIngress;
use sheetflow_db::PgStore;
use sheetflow_events::{EventBus, EventLogger};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sheetflow_api::background::stale_conversions;
use sheetflow_api::config::ServerConfig;
use sheetflow_api::engine::dispatcher::{HttpProcessor, LocalStubProcessor};
use sheetflow_api::engine::storage::LocalObjectStorage;
use sheetflow_api::router::build_app_router;
use sheetflow_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sheetflow_api=debug,sheetflow_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = sheetflow_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    sheetflow_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    sheetflow_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let events_cancel = CancellationToken::new();
    let logger_handle = tokio::spawn(EventLogger::run(
        event_bus.subscribe(),
        events_cancel.clone(),
    ));
    tracing::info!("Event bus created");

    // --- Processor ---
    let conversion = &config.conversion;
    let processor: Arc<dyn ConversionProcessor> = match &conversion.processor_url {
        Some(url) => {
            tracing::info!(endpoint = %url, "Dispatching conversions over HTTP");
            Arc::new(
                HttpProcessor::new(url, conversion.callback_url(), &conversion.webhook_secret)
                    .expect("Failed to build processor HTTP client"),
            )
        }
        None => {
            tracing::warn!("PROCESSOR_URL not set, using the local stub processor");
            Arc::new(LocalStubProcessor::new(
                conversion.callback_url(),
                &conversion.webhook_secret,
                &conversion.public_base_url,
                Duration::from_secs(conversion.stub_completion_delay_secs),
            ))
        }
    };

    // --- Conversion service ---
    let store = Arc::new(PgStore::new(pool.clone()));
    let storage = Arc::new(LocalObjectStorage::new(&conversion.storage_dir));
    tracing::info!(dir = %conversion.storage_dir.display(), "Object storage ready");

    let service = Arc::new(ConversionService::new(ServiceDeps {
        conversions: store.clone(),
        ledger: Ledger::new(store.clone()),
        storage,
        processor,
        analytics: store,
        notifier: event_bus.clone(),
    }));
    let webhook = Arc::new(WebhookIngress::new(
        conversion.webhook_secret.clone(),
        Arc::clone(&service),
    ));

    // --- Background jobs ---
    let jobs_cancel = CancellationToken::new();
    let sweep_handle = tokio::spawn(stale_conversions::run(
        Arc::clone(&service),
        conversion.stale_processing_mins,
        jobs_cancel.clone(),
    ));

    // --- App state ---
    let state = AppState {
        pool: Some(pool),
        config: Arc::new(config.clone()),
        service,
        webhook,
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    let grace = Duration::from_secs(config.shutdown_timeout_secs);

    jobs_cancel.cancel();
    if tokio::time::timeout(grace, sweep_handle).await.is_err() {
        tracing::warn!("Stale conversion sweep did not stop in time");
    }

    events_cancel.cancel();
    match tokio::time::timeout(grace, logger_handle).await {
        Ok(Ok(logged)) => tracing::info!(logged, "Event logger stopped"),
        _ => tracing::warn!("Event logger did not stop cleanly"),
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
