//! In-process implementations of the store and storage traits.
//!
//! Used by the test suites and by local runs without a database. Every
//! read and every conditional write takes the lock separately, so
//! concurrent callers race exactly as they would against PostgreSQL.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::conversion::{Conversion, ConversionMetadata, NewConversion, StatusPatch};
use crate::credits::{CreditAccount, CreditTransaction, NewCreditTransaction};
use crate::error::CoreError;
use crate::status::{ConversionStatus, SubscriptionTier};
use crate::store::{
    ConversionStore, CreditStore, ObjectStorage, StorageError, UsageAnalytics, UsageRecord,
};
use crate::types::{ConversionId, DbId, Timestamp};

#[derive(Default)]
struct Tables {
    accounts: HashMap<DbId, CreditAccount>,
    transactions: Vec<CreditTransaction>,
    next_transaction_id: DbId,
    conversions: HashMap<ConversionId, Conversion>,
    analytics: Vec<UsageRecord>,
}

/// Credit, conversion, and analytics tables behind one lock.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an account without writing an audit row.
    pub async fn seed_account(&self, user_id: DbId, tier: SubscriptionTier, credits: i32) {
        let now = Utc::now();
        self.tables.write().await.accounts.insert(
            user_id,
            CreditAccount {
                user_id,
                credits,
                tier,
                created_at: now,
                updated_at: now,
            },
        );
    }

    pub async fn balance(&self, user_id: DbId) -> Option<i32> {
        self.tables
            .read()
            .await
            .accounts
            .get(&user_id)
            .map(|a| a.credits)
    }

    /// Audit rows for a user in insertion order.
    pub async fn transactions_for(&self, user_id: DbId) -> Vec<CreditTransaction> {
        self.tables
            .read()
            .await
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn analytics_rows(&self) -> Vec<UsageRecord> {
        self.tables.read().await.analytics.clone()
    }

    /// Overwrite `started_at` of a stored conversion.
    pub async fn backdate_start(&self, id: ConversionId, started_at: Timestamp) {
        if let Some(c) = self.tables.write().await.conversions.get_mut(&id) {
            c.started_at = Some(started_at);
        }
    }
}

#[async_trait]
impl CreditStore for MemoryStore {
    async fn find_account(&self, user_id: DbId) -> Result<Option<CreditAccount>, CoreError> {
        Ok(self.tables.read().await.accounts.get(&user_id).cloned())
    }

    async fn open_account(
        &self,
        user_id: DbId,
        tier: SubscriptionTier,
        credits: i32,
    ) -> Result<(CreditAccount, bool), CoreError> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.accounts.get(&user_id) {
            return Ok((existing.clone(), false));
        }
        let now = Utc::now();
        let account = CreditAccount {
            user_id,
            credits,
            tier,
            created_at: now,
            updated_at: now,
        };
        tables.accounts.insert(user_id, account.clone());
        Ok((account, true))
    }

    async fn compare_and_set_credits(
        &self,
        user_id: DbId,
        expected: i32,
        new_credits: i32,
    ) -> Result<bool, CoreError> {
        let mut tables = self.tables.write().await;
        match tables.accounts.get_mut(&user_id) {
            Some(account) if account.credits == expected => {
                account.credits = new_credits;
                account.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn append_transaction(
        &self,
        entry: &NewCreditTransaction,
    ) -> Result<CreditTransaction, CoreError> {
        let mut tables = self.tables.write().await;
        tables.next_transaction_id += 1;
        let row = CreditTransaction {
            id: tables.next_transaction_id,
            user_id: entry.user_id,
            conversion_id: entry.conversion_id,
            delta: entry.delta,
            balance_before: entry.balance_before,
            balance_after: entry.balance_after,
            reason: entry.reason,
            created_at: Utc::now(),
        };
        tables.transactions.push(row.clone());
        Ok(row)
    }

    async fn list_transactions(
        &self,
        user_id: DbId,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, CoreError> {
        Ok(self
            .tables
            .read()
            .await
            .transactions
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn list_conversion_transactions(
        &self,
        conversion_id: ConversionId,
    ) -> Result<Vec<CreditTransaction>, CoreError> {
        Ok(self
            .tables
            .read()
            .await
            .transactions
            .iter()
            .filter(|t| t.conversion_id == Some(conversion_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ConversionStore for MemoryStore {
    async fn create(&self, input: &NewConversion) -> Result<Conversion, CoreError> {
        let mut tables = self.tables.write().await;
        if tables.conversions.contains_key(&input.id) {
            return Err(CoreError::Conflict(format!(
                "Conversion {} already exists",
                input.id
            )));
        }
        let now = Utc::now();
        let conversion = Conversion {
            id: input.id,
            owner_id: input.owner_id,
            file_name: input.file_name.clone(),
            file_size_bytes: input.file_size_bytes,
            document_type: input.document_type.clone(),
            status: ConversionStatus::Pending,
            error_message: None,
            download_url: None,
            metadata: ConversionMetadata::default(),
            storage_key: input.storage_key.clone(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };
        tables.conversions.insert(input.id, conversion.clone());
        Ok(conversion)
    }

    async fn get(&self, id: ConversionId) -> Result<Option<Conversion>, CoreError> {
        Ok(self.tables.read().await.conversions.get(&id).cloned())
    }

    async fn get_many(&self, ids: &[ConversionId]) -> Result<Vec<Conversion>, CoreError> {
        let tables = self.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.conversions.get(id).cloned())
            .collect())
    }

    async fn update_status(
        &self,
        id: ConversionId,
        from: ConversionStatus,
        to: ConversionStatus,
        patch: &StatusPatch,
    ) -> Result<Option<Conversion>, CoreError> {
        let mut tables = self.tables.write().await;
        let Some(conversion) = tables.conversions.get_mut(&id) else {
            return Ok(None);
        };
        if conversion.status != from {
            return Ok(None);
        }

        let now = Utc::now();
        conversion.status = to;
        conversion.updated_at = now;
        match to {
            ConversionStatus::Pending => {
                conversion.error_message = None;
                conversion.download_url = None;
                conversion.metadata = ConversionMetadata::default();
                conversion.started_at = None;
                conversion.completed_at = None;
            }
            ConversionStatus::Processing => {
                conversion.started_at.get_or_insert(now);
            }
            ConversionStatus::Completed => {
                conversion.error_message = None;
                conversion.download_url = patch.download_url.clone();
                conversion.metadata = patch.metadata.clone().unwrap_or_default();
                conversion.started_at.get_or_insert(now);
                conversion.completed_at = Some(now);
            }
            ConversionStatus::Failed => {
                conversion.error_message = patch.error_message.clone();
                conversion.download_url = None;
                conversion.completed_at = Some(now);
            }
        }
        Ok(Some(conversion.clone()))
    }

    async fn list_by_owner(
        &self,
        owner_id: DbId,
        limit: i64,
    ) -> Result<Vec<Conversion>, CoreError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<Conversion> = tables
            .conversions
            .values()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn delete(&self, id: ConversionId) -> Result<bool, CoreError> {
        let mut tables = self.tables.write().await;
        tables.transactions.retain(|t| t.conversion_id != Some(id));
        tables.analytics.retain(|a| a.conversion_id != id);
        Ok(tables.conversions.remove(&id).is_some())
    }

    async fn list_stale_processing(
        &self,
        started_before: Timestamp,
    ) -> Result<Vec<Conversion>, CoreError> {
        Ok(self
            .tables
            .read()
            .await
            .conversions
            .values()
            .filter(|c| {
                c.status == ConversionStatus::Processing
                    && c.started_at.is_some_and(|s| s < started_before)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UsageAnalytics for MemoryStore {
    async fn record(&self, entry: &UsageRecord) -> Result<(), CoreError> {
        self.tables.write().await.analytics.push(entry.clone());
        Ok(())
    }
}

/// Object storage kept in a map, keyed like the filesystem backend.
#[derive(Default)]
pub struct MemoryObjectStorage {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.objects
            .write()
            .await
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.objects.write().await.remove(key);
        Ok(())
    }
}
