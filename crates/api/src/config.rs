use std::path::PathBuf;

use crate::auth::jwt::JwtConfig;

/// Server configuration loaded from environment variables.
///
/// All fields except the secrets have defaults suitable for local
/// development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for background tasks, in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// JWT validation settings.
    pub jwt: JwtConfig,
    /// Processor, webhook, and storage settings.
    pub conversion: ConversionConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`| `30`                       |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            jwt: JwtConfig::from_env(),
            conversion: ConversionConfig::from_env(),
        }
    }
}

/// Settings for talking to the external processor.
#[derive(Debug, Clone)]
pub struct ConversionConfig {
    /// Shared secret for webhook signatures and the body `secret` field.
    pub webhook_secret: String,
    /// Externally reachable base URL of this service, used for callbacks.
    pub public_base_url: String,
    /// Processor endpoint. `None` selects the local stub processor.
    pub processor_url: Option<String>,
    /// Root directory of the local object storage.
    pub storage_dir: PathBuf,
    /// Minutes in `processing` before the sweeper fails a conversion.
    pub stale_processing_mins: i64,
    /// Delay before the stub processor calls back.
    pub stub_completion_delay_secs: u64,
}

impl ConversionConfig {
    /// Load conversion settings from environment variables.
    ///
    /// | Env Var                      | Required | Default                 |
    /// |------------------------------|----------|-------------------------|
    /// | `WEBHOOK_SECRET`             | **yes**  | --                      |
    /// | `PUBLIC_BASE_URL`            | no       | `http://localhost:3000` |
    /// | `PROCESSOR_URL`              | no       | unset (stub processor)  |
    /// | `STORAGE_DIR`                | no       | `./storage`             |
    /// | `STALE_PROCESSING_MINS`      | no       | `30`                    |
    /// | `STUB_COMPLETION_DELAY_SECS` | no       | `5`                     |
    ///
    /// # Panics
    ///
    /// Panics if `WEBHOOK_SECRET` is not set or is empty.
    pub fn from_env() -> Self {
        let webhook_secret = std::env::var("WEBHOOK_SECRET")
            .expect("WEBHOOK_SECRET must be set in the environment");
        assert!(!webhook_secret.is_empty(), "WEBHOOK_SECRET must not be empty");

        let public_base_url = std::env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".into());

        let processor_url = std::env::var("PROCESSOR_URL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let storage_dir = std::env::var("STORAGE_DIR")
            .unwrap_or_else(|_| "./storage".into())
            .into();

        let stale_processing_mins: i64 = std::env::var("STALE_PROCESSING_MINS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("STALE_PROCESSING_MINS must be a valid i64");

        let stub_completion_delay_secs: u64 = std::env::var("STUB_COMPLETION_DELAY_SECS")
            .unwrap_or_else(|_| "5".into())
            .parse()
            .expect("STUB_COMPLETION_DELAY_SECS must be a valid u64");

        Self {
            webhook_secret,
            public_base_url,
            processor_url,
            storage_dir,
            stale_processing_mins,
            stub_completion_delay_secs,
        }
    }

    /// Absolute URL the processor posts results to.
    pub fn callback_url(&self) -> String {
        format!(
            "{}/api/v1/webhooks/conversion",
            self.public_base_url.trim_end_matches('/')
        )
    }
}
