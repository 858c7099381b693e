//! Processor dispatch.
//!
//! [`HttpProcessor`] POSTs the job to `PROCESSOR_URL`; the processor later
//! reports the outcome to the webhook. [`LocalStubProcessor`] is used when
//! no processor is configured: it accepts every job and, after a delay,
//! calls the webhook itself with a signed `completed` payload.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::Serialize;
use sheetflow_core::store::{ConversionProcessor, DispatchError, DispatchRequest};
use sheetflow_core::webhook::{sign_payload, SIGNATURE_HEADER};

/// Timeout for one dispatch request.
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Body sent to the external processor.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessRequest<'a> {
    conversion_id: String,
    /// Base64 of the source PDF.
    file_bytes: String,
    callback_url: &'a str,
    shared_secret: &'a str,
    document_type: &'a str,
    file_name: &'a str,
}

/// Dispatches conversions to an HTTP processor.
pub struct HttpProcessor {
    client: reqwest::Client,
    endpoint: String,
    callback_url: String,
    shared_secret: String,
}

impl HttpProcessor {
    pub fn new(
        endpoint: impl Into<String>,
        callback_url: impl Into<String>,
        shared_secret: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(DISPATCH_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            callback_url: callback_url.into(),
            shared_secret: shared_secret.into(),
        })
    }
}

#[async_trait]
impl ConversionProcessor for HttpProcessor {
    async fn dispatch(&self, request: DispatchRequest) -> Result<(), DispatchError> {
        let body = ProcessRequest {
            conversion_id: request.conversion_id.to_string(),
            file_bytes: base64::engine::general_purpose::STANDARD.encode(&request.file_bytes),
            callback_url: &self.callback_url,
            shared_secret: &self.shared_secret,
            document_type: &request.document_type,
            file_name: &request.file_name,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::HttpStatus(status.as_u16()));
        }

        tracing::debug!(
            conversion_id = %request.conversion_id,
            status = status.as_u16(),
            "Processor accepted conversion",
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Local stub
// ---------------------------------------------------------------------------

/// Accepts every job and reports it completed through the real webhook.
///
/// For local development only.
pub struct LocalStubProcessor {
    client: reqwest::Client,
    callback_url: String,
    shared_secret: String,
    public_base_url: String,
    delay: Duration,
}

impl LocalStubProcessor {
    pub fn new(
        callback_url: impl Into<String>,
        shared_secret: impl Into<String>,
        public_base_url: impl Into<String>,
        delay: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            callback_url: callback_url.into(),
            shared_secret: shared_secret.into(),
            public_base_url: public_base_url.into(),
            delay,
        }
    }

    fn completion_body(&self, request: &DispatchRequest) -> serde_json::Value {
        serde_json::json!({
            "conversionId": request.conversion_id.to_string(),
            "status": "completed",
            "downloadUrl": format!(
                "{}/stub-downloads/{}.xlsx",
                self.public_base_url.trim_end_matches('/'),
                request.conversion_id
            ),
            "metadata": {
                "processingTime": self.delay.as_millis() as i64,
                "fileSize": request.file_bytes.len() as i64,
                "pages": 1,
                "tables": 1,
                "rows": 0,
            },
            "secret": self.shared_secret,
        })
    }
}

#[async_trait]
impl ConversionProcessor for LocalStubProcessor {
    async fn dispatch(&self, request: DispatchRequest) -> Result<(), DispatchError> {
        let body = serde_json::to_vec(&self.completion_body(&request))
            .map_err(|e| DispatchError::Rejected(e.to_string()))?;
        let signature = sign_payload(&self.shared_secret, &body);

        let client = self.client.clone();
        let callback_url = self.callback_url.clone();
        let delay = self.delay;
        let conversion_id = request.conversion_id;

        tracing::info!(%conversion_id, delay_secs = delay.as_secs(), "Stub processor accepted conversion");

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let result = client
                .post(&callback_url)
                .header(SIGNATURE_HEADER, signature)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await;
            match result {
                Ok(resp) if resp.status().is_success() => {
                    tracing::info!(%conversion_id, "Stub processor reported completion");
                }
                Ok(resp) => {
                    tracing::warn!(%conversion_id, status = resp.status().as_u16(), "Stub callback rejected");
                }
                Err(e) => {
                    tracing::warn!(%conversion_id, error = %e, "Stub callback failed");
                }
            }
        });

        Ok(())
    }
}
