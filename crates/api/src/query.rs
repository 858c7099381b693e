//! Shared query parameter types for API handlers.

use serde::Deserialize;
use sheetflow_core::types::ConversionId;

use crate::error::AppError;

/// Most ids accepted by one batch status request.
pub const MAX_BATCH_IDS: usize = 50;

/// `?limit=` for list endpoints. Clamped by the service.
#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<i64>,
}

/// `?ids=a,b,c` for the batch status endpoint.
#[derive(Debug, Deserialize)]
pub struct BatchIdsParams {
    #[serde(default)]
    pub ids: String,
}

impl BatchIdsParams {
    /// Parse the comma-separated ids, dropping duplicates and blanks.
    pub fn parse(&self) -> Result<Vec<ConversionId>, AppError> {
        let mut ids: Vec<ConversionId> = Vec::new();
        for raw in self.ids.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let id: ConversionId = raw
                .parse()
                .map_err(|_| AppError::BadRequest(format!("Invalid conversion id '{raw}'")))?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        if ids.len() > MAX_BATCH_IDS {
            return Err(AppError::BadRequest(format!(
                "At most {MAX_BATCH_IDS} ids per request"
            )));
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn params(ids: &str) -> BatchIdsParams {
        BatchIdsParams { ids: ids.into() }
    }

    #[test]
    fn parses_and_dedupes() {
        let a = uuid::Uuid::new_v4();
        let b = uuid::Uuid::new_v4();
        let parsed = params(&format!("{a}, {b},{a},")).parse().unwrap();
        assert_eq!(parsed, vec![a, b]);
        assert!(params("").parse().unwrap().is_empty());
    }

    #[test]
    fn rejects_bad_ids_and_oversized_batches() {
        assert_matches!(params("nope").parse(), Err(AppError::BadRequest(_)));

        let many: Vec<String> = (0..=MAX_BATCH_IDS)
            .map(|_| uuid::Uuid::new_v4().to_string())
            .collect();
        assert_matches!(params(&many.join(",")).parse(), Err(AppError::BadRequest(_)));
    }
}
