//! Rows of the `conversions` table.

use serde::Serialize;
use sheetflow_core::conversion::{Conversion, ConversionMetadata};
use sheetflow_core::error::CoreError;
use sheetflow_core::status::{ConversionStatus, StatusId};
use sheetflow_core::types::{ConversionId, DbId, Timestamp};
use sqlx::FromRow;

/// A row from the `conversions` table. Metadata columns are flattened.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ConversionRow {
    pub id: ConversionId,
    pub owner_id: DbId,
    pub file_name: String,
    pub file_size_bytes: i64,
    pub document_type: String,
    pub status_id: StatusId,
    pub error_message: Option<String>,
    pub download_url: Option<String>,
    pub tables_extracted: Option<i32>,
    pub row_count: Option<i32>,
    pub page_count: Option<i32>,
    pub processing_time_ms: Option<i64>,
    #[serde(skip_serializing)]
    pub storage_key: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl TryFrom<ConversionRow> for Conversion {
    type Error = CoreError;

    fn try_from(row: ConversionRow) -> Result<Self, Self::Error> {
        let status = ConversionStatus::from_id(row.status_id).ok_or_else(|| {
            CoreError::Internal(format!("Unknown conversion status id {}", row.status_id))
        })?;
        Ok(Conversion {
            id: row.id,
            owner_id: row.owner_id,
            file_name: row.file_name,
            file_size_bytes: row.file_size_bytes,
            document_type: row.document_type,
            status,
            error_message: row.error_message,
            download_url: row.download_url,
            metadata: ConversionMetadata {
                tables_extracted: row.tables_extracted,
                row_count: row.row_count,
                page_count: row.page_count,
                processing_time_ms: row.processing_time_ms,
            },
            storage_key: row.storage_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}
