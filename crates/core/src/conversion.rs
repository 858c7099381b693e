//! Conversion entity, transition patches, and the client-facing snapshot.

use serde::{Deserialize, Serialize};

use crate::progress::{progress_for_status, Stage};
use crate::status::ConversionStatus;
use crate::types::{ConversionId, DbId, Timestamp};

/// Extraction templates the processor understands.
pub const DOCUMENT_TYPES: [&str; 4] = ["generic", "bank_statement", "invoice", "financial_report"];

/// Template used when the client does not pick one.
pub const DEFAULT_DOCUMENT_TYPE: &str = "generic";

/// Error message recorded when the processor fails without a reason.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Conversion failed";

/// Result metadata reported by the external processor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionMetadata {
    pub tables_extracted: Option<i32>,
    pub row_count: Option<i32>,
    pub page_count: Option<i32>,
    pub processing_time_ms: Option<i64>,
}

/// One user-submitted PDF-to-spreadsheet job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversion {
    pub id: ConversionId,
    pub owner_id: DbId,
    pub file_name: String,
    pub file_size_bytes: i64,
    pub document_type: String,
    pub status: ConversionStatus,
    pub error_message: Option<String>,
    /// Signed download URL of the generated spreadsheet; set iff `completed`.
    pub download_url: Option<String>,
    pub metadata: ConversionMetadata,
    /// Object-storage key of the uploaded source PDF.
    #[serde(skip_serializing)]
    pub storage_key: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

/// Insert DTO for [`Conversion`]. New records always start `pending`.
#[derive(Debug, Clone)]
pub struct NewConversion {
    pub id: ConversionId,
    pub owner_id: DbId,
    pub file_name: String,
    pub file_size_bytes: i64,
    pub document_type: String,
    pub storage_key: String,
}

/// Fields written alongside a status change.
///
/// Which fields apply depends on the target status; stores ignore the rest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusPatch {
    pub error_message: Option<String>,
    pub download_url: Option<String>,
    pub metadata: Option<ConversionMetadata>,
}

/// A terminal result reported for a conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed {
        download_url: String,
        metadata: ConversionMetadata,
    },
    Failed {
        error: String,
    },
}

impl Outcome {
    pub fn status(&self) -> ConversionStatus {
        match self {
            Self::Completed { .. } => ConversionStatus::Completed,
            Self::Failed { .. } => ConversionStatus::Failed,
        }
    }

    pub fn patch(&self) -> StatusPatch {
        match self {
            Self::Completed {
                download_url,
                metadata,
            } => StatusPatch {
                error_message: None,
                download_url: Some(download_url.clone()),
                metadata: Some(metadata.clone()),
            },
            Self::Failed { error } => StatusPatch {
                error_message: Some(error.clone()),
                download_url: None,
                metadata: None,
            },
        }
    }
}

/// Client-facing status view with the computed progress fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionSnapshot {
    pub id: ConversionId,
    pub status: ConversionStatus,
    pub file_name: String,
    pub file_size_bytes: i64,
    pub document_type: String,
    pub error_message: Option<String>,
    pub download_url: Option<String>,
    pub progress: u8,
    pub current_stage: Stage,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl ConversionSnapshot {
    /// Build a snapshot, measuring elapsed processing time up to `now`.
    pub fn from_conversion(conversion: &Conversion, now: Timestamp) -> Self {
        let elapsed_ms = conversion
            .started_at
            .map(|started| (now - started).num_milliseconds())
            .unwrap_or(0);
        let progress = progress_for_status(
            conversion.status,
            conversion.file_size_bytes,
            elapsed_ms,
        );

        Self {
            id: conversion.id,
            status: conversion.status,
            file_name: conversion.file_name.clone(),
            file_size_bytes: conversion.file_size_bytes,
            document_type: conversion.document_type.clone(),
            error_message: conversion.error_message.clone(),
            download_url: conversion.download_url.clone(),
            progress: progress.percent,
            current_stage: progress.stage,
            created_at: conversion.created_at,
            updated_at: conversion.updated_at,
            started_at: conversion.started_at,
            completed_at: conversion.completed_at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn processing(started_secs_ago: i64) -> (Conversion, Timestamp) {
        let now = chrono::Utc::now();
        let conversion = Conversion {
            id: uuid::Uuid::new_v4(),
            owner_id: 7,
            file_name: "statement.pdf".into(),
            file_size_bytes: 2 * 1024 * 1024,
            document_type: DEFAULT_DOCUMENT_TYPE.into(),
            status: ConversionStatus::Processing,
            error_message: None,
            download_url: None,
            metadata: ConversionMetadata::default(),
            storage_key: "7/statement.pdf".into(),
            created_at: now - Duration::seconds(started_secs_ago + 1),
            updated_at: now,
            started_at: Some(now - Duration::seconds(started_secs_ago)),
            completed_at: None,
        };
        (conversion, now)
    }

    #[test]
    fn snapshot_progress_advances_with_elapsed_time() {
        let (early, now) = processing(1);
        let (late, _) = processing(30);
        let a = ConversionSnapshot::from_conversion(&early, now);
        let b = ConversionSnapshot::from_conversion(&late, now);
        assert!(b.progress > a.progress);
        assert!(b.progress < 100);
    }

    #[test]
    fn snapshot_hides_storage_key() {
        let (conversion, now) = processing(1);
        let json = serde_json::to_value(&conversion).unwrap();
        assert!(json.get("storage_key").is_none());
        let snapshot = serde_json::to_value(ConversionSnapshot::from_conversion(&conversion, now))
            .unwrap();
        assert_eq!(snapshot["current_stage"], "upload");
    }

    #[test]
    fn failed_outcome_patch_carries_only_the_error() {
        let patch = Outcome::Failed {
            error: "timeout".into(),
        }
        .patch();
        assert_eq!(patch.error_message.as_deref(), Some("timeout"));
        assert!(patch.download_url.is_none());
    }
}
