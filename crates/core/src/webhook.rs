//! Inbound processor webhooks: signature verification, payload parsing,
//! and the idempotent ingress that applies the reported outcome.
//!
//! Order of checks: signature first (no parsing before authentication),
//! then payload shape, then the body secret, then the conversion lookup.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use validator::Validate;

use crate::conversion::{ConversionMetadata, Outcome, DEFAULT_FAILURE_MESSAGE};
use crate::error::CoreError;
use crate::lifecycle::ConversionService;
use crate::types::ConversionId;

/// Header carrying the hex HMAC-SHA256 of the raw body.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

/// Hex HMAC-SHA256 of `body` keyed by `secret`.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify `signature` (hex) against `body` in constant time.
pub fn verify_signature(secret: &str, body: &[u8], signature: Option<&str>) -> Result<(), CoreError> {
    let provided = signature
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(CoreError::InvalidSignature)?;
    let provided = hex::decode(provided).map_err(|_| CoreError::InvalidSignature)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    mac.verify_slice(&provided)
        .map_err(|_| CoreError::InvalidSignature)
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Completed,
    Failed,
}

/// Optional processing details; unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WebhookMetadata {
    #[validate(range(min = 0))]
    pub processing_time: Option<i64>,
    #[validate(range(min = 0))]
    pub file_size: Option<i64>,
    #[validate(range(min = 0))]
    pub pages: Option<i32>,
    #[validate(range(min = 0))]
    pub tables: Option<i32>,
    #[validate(range(min = 0))]
    pub rows: Option<i32>,
}

/// Wire body of `POST /webhooks/conversion`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WebhookPayload {
    #[validate(length(min = 1, max = 64))]
    pub conversion_id: String,
    pub status: WebhookStatus,
    #[validate(url)]
    pub download_url: Option<String>,
    #[validate(length(max = 2000))]
    pub error: Option<String>,
    #[validate(nested)]
    pub metadata: Option<WebhookMetadata>,
    pub secret: Option<String>,
}

/// A webhook body that passed shape validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedWebhook {
    pub conversion_id: ConversionId,
    pub outcome: Outcome,
    pub secret: Option<String>,
}

/// Parse and validate a raw webhook body. Fails closed.
pub fn parse_payload(body: &[u8]) -> Result<ParsedWebhook, CoreError> {
    let payload: WebhookPayload = serde_json::from_slice(body)
        .map_err(|e| CoreError::InvalidPayload(e.to_string()))?;
    payload
        .validate()
        .map_err(|e| CoreError::InvalidPayload(e.to_string()))?;

    let conversion_id: ConversionId = payload
        .conversion_id
        .parse()
        .map_err(|_| CoreError::InvalidPayload("conversionId must be a UUID".into()))?;

    let meta = payload.metadata.unwrap_or_default();
    let outcome = match payload.status {
        WebhookStatus::Completed => {
            let download_url = payload.download_url.ok_or_else(|| {
                CoreError::InvalidPayload("downloadUrl is required when completed".into())
            })?;
            Outcome::Completed {
                download_url,
                metadata: ConversionMetadata {
                    tables_extracted: meta.tables,
                    row_count: meta.rows,
                    page_count: meta.pages,
                    processing_time_ms: meta.processing_time,
                },
            }
        }
        WebhookStatus::Failed => Outcome::Failed {
            error: payload
                .error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
        },
    };

    Ok(ParsedWebhook {
        conversion_id,
        outcome,
        secret: payload.secret,
    })
}

// ---------------------------------------------------------------------------
// Ingress
// ---------------------------------------------------------------------------

/// Acknowledgement returned to the webhook sender.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookAck {
    pub success: bool,
    #[serde(skip)]
    pub conversion_id: ConversionId,
    /// The delivery repeated an already-applied terminal status.
    #[serde(skip)]
    pub duplicate: bool,
}

/// Authenticates processor callbacks and applies them to the state machine.
#[derive(Clone)]
pub struct WebhookIngress {
    secret: String,
    service: Arc<ConversionService>,
}

impl WebhookIngress {
    pub fn new(secret: impl Into<String>, service: Arc<ConversionService>) -> Self {
        Self {
            secret: secret.into(),
            service,
        }
    }

    pub async fn handle(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookAck, CoreError> {
        verify_signature(&self.secret, raw_body, signature)?;

        let parsed = parse_payload(raw_body)?;

        let body_secret = parsed.secret.as_deref().unwrap_or_default();
        if !bool::from(body_secret.as_bytes().ct_eq(self.secret.as_bytes())) {
            return Err(CoreError::InvalidSignature);
        }

        let applied = self
            .service
            .apply_outcome(parsed.conversion_id, parsed.outcome)
            .await?;

        Ok(WebhookAck {
            success: true,
            conversion_id: applied.conversion.id,
            duplicate: applied.duplicate,
        })
    }
}
