use serde::Serialize;
use sheetflow_core::status::StatusId;
use sheetflow_core::types::{ConversionId, DbId, Timestamp};
use sqlx::FromRow;

/// A row from the `conversion_analytics` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ConversionAnalyticsRow {
    pub id: DbId,
    pub conversion_id: ConversionId,
    pub owner_id: DbId,
    pub status_id: StatusId,
    pub processing_time_ms: Option<i64>,
    pub pages: Option<i32>,
    pub tables: Option<i32>,
    pub created_at: Timestamp,
}
