//! Repository for the `conversions` table.
//!
//! Status changes are compare-and-set on `status_id`: a write that finds
//! the row in a different status than expected changes nothing.

use sheetflow_core::conversion::{NewConversion, StatusPatch};
use sheetflow_core::status::ConversionStatus;
use sheetflow_core::types::{ConversionId, DbId, Timestamp};
use sqlx::PgPool;

use crate::models::conversion::ConversionRow;

const COLUMNS: &str = "\
    id, owner_id, file_name, file_size_bytes, document_type, status_id, \
    error_message, download_url, tables_extracted, row_count, page_count, \
    processing_time_ms, storage_key, created_at, updated_at, started_at, completed_at";

/// Column assignments applied when entering each status.
///
/// `$1..$3` are always id, from, to; `$4..$8` are bound only where used.
fn set_clause(to: ConversionStatus) -> &'static str {
    match to {
        ConversionStatus::Pending => {
            "error_message = NULL, download_url = NULL, tables_extracted = NULL, \
             row_count = NULL, page_count = NULL, processing_time_ms = NULL, \
             started_at = NULL, completed_at = NULL"
        }
        ConversionStatus::Processing => "started_at = COALESCE(started_at, NOW())",
        ConversionStatus::Completed => {
            "error_message = NULL, download_url = $4, tables_extracted = $5, \
             row_count = $6, page_count = $7, processing_time_ms = $8, \
             started_at = COALESCE(started_at, NOW()), completed_at = NOW()"
        }
        ConversionStatus::Failed => {
            "error_message = $4, download_url = NULL, completed_at = NOW()"
        }
    }
}

/// Provides persistence for conversion records.
pub struct ConversionRepo;

impl ConversionRepo {
    /// Insert a new conversion in `pending`.
    pub async fn create(pool: &PgPool, input: &NewConversion) -> Result<ConversionRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO conversions \
                (id, owner_id, file_name, file_size_bytes, document_type, storage_key, status_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ConversionRow>(&query)
            .bind(input.id)
            .bind(input.owner_id)
            .bind(&input.file_name)
            .bind(input.file_size_bytes)
            .bind(&input.document_type)
            .bind(&input.storage_key)
            .bind(ConversionStatus::Pending.id())
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(
        pool: &PgPool,
        id: ConversionId,
    ) -> Result<Option<ConversionRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM conversions WHERE id = $1");
        sqlx::query_as::<_, ConversionRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Rows whose id is in `ids`. Missing ids are skipped.
    pub async fn find_many(
        pool: &PgPool,
        ids: &[ConversionId],
    ) -> Result<Vec<ConversionRow>, sqlx::Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!("SELECT {COLUMNS} FROM conversions WHERE id = ANY($1)");
        sqlx::query_as::<_, ConversionRow>(&query)
            .bind(ids)
            .fetch_all(pool)
            .await
    }

    /// Move a conversion from `from` to `to`.
    ///
    /// Returns `None` if the row is missing or no longer in `from`.
    pub async fn update_status(
        pool: &PgPool,
        id: ConversionId,
        from: ConversionStatus,
        to: ConversionStatus,
        patch: &StatusPatch,
    ) -> Result<Option<ConversionRow>, sqlx::Error> {
        let query = format!(
            "UPDATE conversions SET status_id = $3, updated_at = NOW(), {} \
             WHERE id = $1 AND status_id = $2 \
             RETURNING {COLUMNS}",
            set_clause(to)
        );
        let mut q = sqlx::query_as::<_, ConversionRow>(&query)
            .bind(id)
            .bind(from.id())
            .bind(to.id());

        match to {
            ConversionStatus::Completed => {
                let meta = patch.metadata.clone().unwrap_or_default();
                q = q
                    .bind(patch.download_url.clone())
                    .bind(meta.tables_extracted)
                    .bind(meta.row_count)
                    .bind(meta.page_count)
                    .bind(meta.processing_time_ms);
            }
            ConversionStatus::Failed => {
                q = q.bind(patch.error_message.clone());
            }
            ConversionStatus::Pending | ConversionStatus::Processing => {}
        }

        q.fetch_optional(pool).await
    }

    /// Newest first.
    pub async fn list_by_owner(
        pool: &PgPool,
        owner_id: DbId,
        limit: i64,
    ) -> Result<Vec<ConversionRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM conversions \
             WHERE owner_id = $1 \
             ORDER BY created_at DESC \
             LIMIT $2"
        );
        sqlx::query_as::<_, ConversionRow>(&query)
            .bind(owner_id)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Delete a conversion and the credit audit rows that reference it.
    /// Analytics rows go with the foreign-key cascade.
    ///
    /// Returns `true` if the conversion existed.
    pub async fn delete(pool: &PgPool, id: ConversionId) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query("DELETE FROM credit_transactions WHERE conversion_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM conversions WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Conversions in `processing` that started before `started_before`.
    pub async fn list_stale_processing(
        pool: &PgPool,
        started_before: Timestamp,
    ) -> Result<Vec<ConversionRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM conversions \
             WHERE status_id = $1 AND started_at < $2 \
             ORDER BY started_at"
        );
        sqlx::query_as::<_, ConversionRow>(&query)
            .bind(ConversionStatus::Processing.id())
            .bind(started_before)
            .fetch_all(pool)
            .await
    }
}
