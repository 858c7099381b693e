//! PostgreSQL implementations of the core store traits.

use async_trait::async_trait;
use sheetflow_core::conversion::{Conversion, NewConversion, StatusPatch};
use sheetflow_core::credits::{CreditAccount, CreditTransaction, NewCreditTransaction};
use sheetflow_core::error::CoreError;
use sheetflow_core::status::{ConversionStatus, SubscriptionTier};
use sheetflow_core::store::{ConversionStore, CreditStore, UsageAnalytics, UsageRecord};
use sheetflow_core::types::{ConversionId, DbId, Timestamp};
use sqlx::PgPool;

use crate::repositories::{AnalyticsRepo, ConversionRepo, CreditRepo};

/// Credit, conversion, and analytics persistence over one pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Log a database error and hide its details from callers.
fn db_error(err: sqlx::Error) -> CoreError {
    tracing::error!(error = %err, "Database error");
    CoreError::Internal("Database error".into())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, CoreError>
where
    T: TryFrom<R, Error = CoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[async_trait]
impl CreditStore for PgStore {
    async fn find_account(&self, user_id: DbId) -> Result<Option<CreditAccount>, CoreError> {
        CreditRepo::find(&self.pool, user_id)
            .await
            .map_err(db_error)?
            .map(CreditAccount::try_from)
            .transpose()
    }

    async fn open_account(
        &self,
        user_id: DbId,
        tier: SubscriptionTier,
        credits: i32,
    ) -> Result<(CreditAccount, bool), CoreError> {
        let inserted = CreditRepo::insert_if_absent(&self.pool, user_id, tier.id(), credits)
            .await
            .map_err(db_error)?;
        if let Some(row) = inserted {
            return Ok((row.try_into()?, true));
        }

        let existing = CreditRepo::find(&self.pool, user_id)
            .await
            .map_err(db_error)?
            .ok_or_else(|| CoreError::not_found("CreditAccount", user_id))?;
        Ok((existing.try_into()?, false))
    }

    async fn compare_and_set_credits(
        &self,
        user_id: DbId,
        expected: i32,
        new_credits: i32,
    ) -> Result<bool, CoreError> {
        CreditRepo::compare_and_set(&self.pool, user_id, expected, new_credits)
            .await
            .map_err(db_error)
    }

    async fn append_transaction(
        &self,
        entry: &NewCreditTransaction,
    ) -> Result<CreditTransaction, CoreError> {
        CreditRepo::insert_transaction(&self.pool, entry)
            .await
            .map_err(db_error)?
            .try_into()
    }

    async fn list_transactions(
        &self,
        user_id: DbId,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, CoreError> {
        let rows = CreditRepo::list_transactions(&self.pool, user_id, limit)
            .await
            .map_err(db_error)?;
        convert_all(rows)
    }

    async fn list_conversion_transactions(
        &self,
        conversion_id: ConversionId,
    ) -> Result<Vec<CreditTransaction>, CoreError> {
        let rows = CreditRepo::list_for_conversion(&self.pool, conversion_id)
            .await
            .map_err(db_error)?;
        convert_all(rows)
    }
}

#[async_trait]
impl ConversionStore for PgStore {
    async fn create(&self, input: &NewConversion) -> Result<Conversion, CoreError> {
        match ConversionRepo::create(&self.pool, input).await {
            Ok(row) => row.try_into(),
            Err(e) if is_unique_violation(&e) => Err(CoreError::Conflict(format!(
                "Conversion {} already exists",
                input.id
            ))),
            Err(e) => Err(db_error(e)),
        }
    }

    async fn get(&self, id: ConversionId) -> Result<Option<Conversion>, CoreError> {
        ConversionRepo::find_by_id(&self.pool, id)
            .await
            .map_err(db_error)?
            .map(Conversion::try_from)
            .transpose()
    }

    async fn get_many(&self, ids: &[ConversionId]) -> Result<Vec<Conversion>, CoreError> {
        let rows = ConversionRepo::find_many(&self.pool, ids)
            .await
            .map_err(db_error)?;
        convert_all(rows)
    }

    async fn update_status(
        &self,
        id: ConversionId,
        from: ConversionStatus,
        to: ConversionStatus,
        patch: &StatusPatch,
    ) -> Result<Option<Conversion>, CoreError> {
        ConversionRepo::update_status(&self.pool, id, from, to, patch)
            .await
            .map_err(db_error)?
            .map(Conversion::try_from)
            .transpose()
    }

    async fn list_by_owner(
        &self,
        owner_id: DbId,
        limit: i64,
    ) -> Result<Vec<Conversion>, CoreError> {
        let rows = ConversionRepo::list_by_owner(&self.pool, owner_id, limit)
            .await
            .map_err(db_error)?;
        convert_all(rows)
    }

    async fn delete(&self, id: ConversionId) -> Result<bool, CoreError> {
        ConversionRepo::delete(&self.pool, id).await.map_err(db_error)
    }

    async fn list_stale_processing(
        &self,
        started_before: Timestamp,
    ) -> Result<Vec<Conversion>, CoreError> {
        let rows = ConversionRepo::list_stale_processing(&self.pool, started_before)
            .await
            .map_err(db_error)?;
        convert_all(rows)
    }
}

#[async_trait]
impl UsageAnalytics for PgStore {
    async fn record(&self, entry: &UsageRecord) -> Result<(), CoreError> {
        AnalyticsRepo::insert(&self.pool, entry)
            .await
            .map(|_| ())
            .map_err(db_error)
    }
}
