#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use sheetflow_api::auth::jwt::{Claims, JwtConfig, Role};
use sheetflow_api::config::{ConversionConfig, ServerConfig};
use sheetflow_api::router::build_app_router;
use sheetflow_api::state::AppState;
use sheetflow_core::ledger::Ledger;
use sheetflow_core::lifecycle::{ConversionService, ServiceDeps};
use sheetflow_core::memory::{MemoryObjectStorage, MemoryStore};
use sheetflow_core::status::SubscriptionTier;
use sheetflow_core::store::{ConversionProcessor, DispatchError, DispatchRequest};
use sheetflow_core::types::DbId;
use sheetflow_core::webhook::{sign_payload, WebhookIngress, SIGNATURE_HEADER};
use sheetflow_events::EventBus;

pub const USER: DbId = 7;
pub const OTHER_USER: DbId = 8;
pub const ADMIN: DbId = 1;
pub const WEBHOOK_SECRET: &str = "whsec_integration";

const BOUNDARY: &str = "sheetflow-test-boundary";

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        jwt: JwtConfig {
            secret: "integration-test-jwt-secret".to_string(),
        },
        conversion: ConversionConfig {
            webhook_secret: WEBHOOK_SECRET.to_string(),
            public_base_url: "http://localhost:3000".to_string(),
            processor_url: None,
            storage_dir: "./storage".into(),
            stale_processing_mins: 10,
            stub_completion_delay_secs: 0,
        },
    }
}

/// Processor that accepts jobs until told to fail.
#[derive(Default)]
pub struct ScriptedProcessor {
    failing: AtomicBool,
}

impl ScriptedProcessor {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConversionProcessor for ScriptedProcessor {
    async fn dispatch(&self, _request: DispatchRequest) -> Result<(), DispatchError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DispatchError::HttpStatus(503));
        }
        Ok(())
    }
}

/// The application over in-memory stores, with handles for assertions.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub storage: Arc<MemoryObjectStorage>,
    pub processor: Arc<ScriptedProcessor>,
    pub event_bus: Arc<EventBus>,
    pub service: Arc<ConversionService>,
    pub config: ServerConfig,
}

/// Build the full application router with all middleware layers.
pub fn build_test_app() -> TestApp {
    let config = test_config();
    let store = Arc::new(MemoryStore::new());
    let storage = Arc::new(MemoryObjectStorage::new());
    let processor = Arc::new(ScriptedProcessor::default());
    let event_bus = Arc::new(EventBus::default());

    let service = Arc::new(ConversionService::new(ServiceDeps {
        conversions: store.clone(),
        ledger: Ledger::new(store.clone()),
        storage: storage.clone(),
        processor: processor.clone(),
        analytics: store.clone(),
        notifier: event_bus.clone(),
    }));

    let state = AppState {
        pool: None,
        config: Arc::new(config.clone()),
        service: Arc::clone(&service),
        webhook: Arc::new(WebhookIngress::new(WEBHOOK_SECRET, Arc::clone(&service))),
    };

    TestApp {
        router: build_app_router(state, &config),
        store,
        storage,
        processor,
        event_bus,
        service,
        config,
    }
}

impl TestApp {
    pub async fn with_credits(credits: i32) -> Self {
        let app = build_test_app();
        app.store
            .seed_account(USER, SubscriptionTier::Free, credits)
            .await;
        app
    }

    /// A token as the identity provider would issue it.
    pub fn mint(&self, user_id: DbId, role: Role) -> String {
        let claims = Claims {
            sub: user_id,
            role,
            exp: chrono::Utc::now().timestamp() + 15 * 60,
        };
        jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(self.config.jwt.secret.as_bytes()),
        )
        .unwrap()
    }

    pub fn token(&self, user_id: DbId) -> String {
        self.mint(user_id, Role::User)
    }

    pub fn admin_token(&self) -> String {
        self.mint(ADMIN, Role::Admin)
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_empty(&self, uri: &str, token: &str) -> Response<Body> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    pub async fn delete(&self, uri: &str, token: &str) -> Response<Body> {
        let request = Request::builder()
            .method(Method::DELETE)
            .uri(uri)
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    /// Upload `bytes` as the `file` field of a multipart form.
    pub async fn upload(
        &self,
        token: &str,
        file_name: &str,
        bytes: &[u8],
        document_type: Option<&str>,
    ) -> Response<Body> {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/conversions")
            .header("authorization", format!("Bearer {token}"))
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(file_name, bytes, document_type)))
            .unwrap();
        self.send(request).await
    }

    /// POST a webhook body signed with `secret`.
    pub async fn webhook(&self, body: &serde_json::Value, secret: &str) -> Response<Body> {
        let raw = serde_json::to_vec(body).unwrap();
        let signature = sign_payload(secret, &raw);
        self.webhook_raw(raw, Some(&signature)).await
    }

    pub async fn webhook_raw(&self, raw: Vec<u8>, signature: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/webhooks/conversion")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        self.send(builder.body(Body::from(raw)).unwrap()).await
    }

    pub async fn balance(&self, user_id: DbId) -> i32 {
        self.store.balance(user_id).await.unwrap()
    }
}

/// A PDF-looking payload of `size` bytes.
pub fn pdf_bytes(size: usize) -> Vec<u8> {
    let mut bytes = b"%PDF-1.7\n".to_vec();
    bytes.resize(size.max(bytes.len()), b' ');
    bytes
}

pub fn multipart_body(file_name: &str, bytes: &[u8], document_type: Option<&str>) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(document_type) = document_type {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"document_type\"\r\n\r\n{document_type}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/pdf\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
