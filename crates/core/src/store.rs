//! Seams to the durable store and the external collaborators.
//!
//! The ledger and the conversion state machine only talk to these traits.
//! `sheetflow-db` implements the stores on PostgreSQL; [`crate::memory`]
//! provides in-process implementations.

use async_trait::async_trait;
use serde::Serialize;

use crate::conversion::{Conversion, NewConversion, StatusPatch};
use crate::credits::{CreditAccount, CreditTransaction, NewCreditTransaction};
use crate::error::CoreError;
use crate::status::{ConversionStatus, SubscriptionTier};
use crate::types::{ConversionId, DbId, Timestamp};

// ---------------------------------------------------------------------------
// Credit balances
// ---------------------------------------------------------------------------

#[async_trait]
pub trait CreditStore: Send + Sync {
    async fn find_account(&self, user_id: DbId) -> Result<Option<CreditAccount>, CoreError>;

    /// Insert an account unless one exists. Returns the stored account and
    /// whether this call created it.
    async fn open_account(
        &self,
        user_id: DbId,
        tier: SubscriptionTier,
        credits: i32,
    ) -> Result<(CreditAccount, bool), CoreError>;

    /// Set the balance to `new_credits` only if it still equals `expected`.
    ///
    /// Returns `false` when the row changed since it was read.
    async fn compare_and_set_credits(
        &self,
        user_id: DbId,
        expected: i32,
        new_credits: i32,
    ) -> Result<bool, CoreError>;

    async fn append_transaction(
        &self,
        entry: &NewCreditTransaction,
    ) -> Result<CreditTransaction, CoreError>;

    /// Newest first.
    async fn list_transactions(
        &self,
        user_id: DbId,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, CoreError>;

    /// Every audit row referencing `conversion_id`, oldest first.
    async fn list_conversion_transactions(
        &self,
        conversion_id: ConversionId,
    ) -> Result<Vec<CreditTransaction>, CoreError>;
}

// ---------------------------------------------------------------------------
// Conversion records
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ConversionStore: Send + Sync {
    async fn create(&self, input: &NewConversion) -> Result<Conversion, CoreError>;

    async fn get(&self, id: ConversionId) -> Result<Option<Conversion>, CoreError>;

    async fn get_many(&self, ids: &[ConversionId]) -> Result<Vec<Conversion>, CoreError>;

    /// Move `id` from `from` to `to`, applying `patch`.
    ///
    /// Conditional on the stored status still being `from`; returns `None`
    /// otherwise. Always stamps `updated_at`; entering a terminal status
    /// stamps `completed_at`, entering `processing` stamps `started_at`,
    /// and entering `pending` clears the previous attempt's result fields.
    async fn update_status(
        &self,
        id: ConversionId,
        from: ConversionStatus,
        to: ConversionStatus,
        patch: &StatusPatch,
    ) -> Result<Option<Conversion>, CoreError>;

    /// Newest first, at most `limit` rows.
    async fn list_by_owner(&self, owner_id: DbId, limit: i64)
        -> Result<Vec<Conversion>, CoreError>;

    /// Delete the record together with the audit and analytics rows that
    /// reference it. Returns `false` if it did not exist.
    async fn delete(&self, id: ConversionId) -> Result<bool, CoreError>;

    /// Conversions still `processing` that started before `started_before`.
    async fn list_stale_processing(
        &self,
        started_before: Timestamp,
    ) -> Result<Vec<Conversion>, CoreError>;
}

// ---------------------------------------------------------------------------
// Usage analytics
// ---------------------------------------------------------------------------

/// One analytics row written when a conversion reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageRecord {
    pub conversion_id: ConversionId,
    pub owner_id: DbId,
    pub outcome: ConversionStatus,
    pub processing_time_ms: Option<i64>,
    pub pages: Option<i32>,
    pub tables: Option<i32>,
}

#[async_trait]
pub trait UsageAnalytics: Send + Sync {
    async fn record(&self, entry: &UsageRecord) -> Result<(), CoreError>;
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// A terminal transition announced to interested listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionNotice {
    pub conversion_id: ConversionId,
    pub owner_id: DbId,
    pub status: ConversionStatus,
    pub error_message: Option<String>,
}

pub trait ConversionNotifier: Send + Sync {
    fn notify(&self, notice: ConversionNotice) -> Result<(), CoreError>;
}

// ---------------------------------------------------------------------------
// Object storage
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        CoreError::Internal(err.to_string())
    }
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

// ---------------------------------------------------------------------------
// External processor
// ---------------------------------------------------------------------------

/// What the processor needs to start one extraction.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub conversion_id: ConversionId,
    pub file_name: String,
    pub document_type: String,
    pub file_bytes: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Processor request failed: {0}")]
    Transport(String),

    #[error("Processor returned HTTP {0}")]
    HttpStatus(u16),

    #[error("Processor rejected the job: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait ConversionProcessor: Send + Sync {
    /// Hand a conversion to the processor. `Ok` means it accepted the job
    /// and will call back; any error is an immediate conversion failure.
    async fn dispatch(&self, request: DispatchRequest) -> Result<(), DispatchError>;
}
