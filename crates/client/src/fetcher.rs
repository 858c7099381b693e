//! Batch status fetching.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sheetflow_core::conversion::ConversionSnapshot;
use sheetflow_core::types::ConversionId;

/// Per-request timeout of [`HttpStatusFetcher`].
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a status fetch did not produce snapshots.
///
/// `Clone` so one result can be handed to every caller of a coalesced
/// request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("status request failed: {0}")]
    Transport(String),

    #[error("status endpoint returned HTTP {0}")]
    Status(u16),

    #[error("invalid status response: {0}")]
    Decode(String),
}

/// Source of conversion snapshots. Ids the caller may not see are omitted
/// from the result rather than reported as errors.
#[async_trait]
pub trait StatusFetcher: Send + Sync {
    async fn fetch_batch(
        &self,
        ids: &[ConversionId],
    ) -> Result<Vec<ConversionSnapshot>, FetchError>;
}

#[derive(Deserialize)]
struct BatchEnvelope {
    data: Vec<ConversionSnapshot>,
}

/// Fetches snapshots from `GET /api/v1/status/batch`.
pub struct HttpStatusFetcher {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl HttpStatusFetcher {
    pub fn new(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            access_token: access_token.into(),
        })
    }
}

#[async_trait]
impl StatusFetcher for HttpStatusFetcher {
    async fn fetch_batch(
        &self,
        ids: &[ConversionId],
    ) -> Result<Vec<ConversionSnapshot>, FetchError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let joined = ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let url = format!(
            "{}/api/v1/status/batch",
            self.base_url.trim_end_matches('/')
        );

        let response = self
            .client
            .get(&url)
            .query(&[("ids", joined.as_str())])
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let envelope: BatchEnvelope = response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;
        Ok(envelope.data)
    }
}
