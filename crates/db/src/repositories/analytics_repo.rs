//! Repository for the `conversion_analytics` table.

use sheetflow_core::store::UsageRecord;
use sheetflow_core::types::DbId;
use sqlx::PgPool;

use crate::models::analytics::ConversionAnalyticsRow;

const COLUMNS: &str = "\
    id, conversion_id, owner_id, status_id, processing_time_ms, pages, tables, created_at";

pub struct AnalyticsRepo;

impl AnalyticsRepo {
    pub async fn insert(
        pool: &PgPool,
        entry: &UsageRecord,
    ) -> Result<ConversionAnalyticsRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO conversion_analytics \
                (conversion_id, owner_id, status_id, processing_time_ms, pages, tables) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ConversionAnalyticsRow>(&query)
            .bind(entry.conversion_id)
            .bind(entry.owner_id)
            .bind(entry.outcome.id())
            .bind(entry.processing_time_ms)
            .bind(entry.pages)
            .bind(entry.tables)
            .fetch_one(pool)
            .await
    }

    /// Newest first.
    pub async fn list_for_owner(
        pool: &PgPool,
        owner_id: DbId,
    ) -> Result<Vec<ConversionAnalyticsRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM conversion_analytics \
             WHERE owner_id = $1 ORDER BY created_at DESC, id DESC"
        );
        sqlx::query_as::<_, ConversionAnalyticsRow>(&query)
            .bind(owner_id)
            .fetch_all(pool)
            .await
    }
}
