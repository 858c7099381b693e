#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use sheetflow_core::credits::{
    CreditAccount, CreditReason, CreditTransaction, NewCreditTransaction,
};
use sheetflow_core::error::CoreError;
use sheetflow_core::ledger::Ledger;
use sheetflow_core::lifecycle::{ConversionService, ServiceDeps, SubmitConversion};
use sheetflow_core::memory::{MemoryObjectStorage, MemoryStore};
use sheetflow_core::status::SubscriptionTier;
use sheetflow_core::store::{
    ConversionNotice, ConversionNotifier, ConversionProcessor, CreditStore, DispatchError,
    DispatchRequest, UsageAnalytics, UsageRecord,
};
use sheetflow_core::types::{ConversionId, DbId};

pub const USER: DbId = 7;
pub const OTHER_USER: DbId = 8;

/// Processor that accepts jobs until told to fail.
#[derive(Default)]
pub struct ScriptedProcessor {
    failing: AtomicBool,
    dispatched: AtomicUsize,
}

impl ScriptedProcessor {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversionProcessor for ScriptedProcessor {
    async fn dispatch(&self, _request: DispatchRequest) -> Result<(), DispatchError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DispatchError::HttpStatus(503));
        }
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<ConversionNotice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<ConversionNotice> {
        self.notices.lock().unwrap().clone()
    }
}

impl ConversionNotifier for RecordingNotifier {
    fn notify(&self, notice: ConversionNotice) -> Result<(), CoreError> {
        self.notices.lock().unwrap().push(notice);
        Ok(())
    }
}

/// Analytics sink that is always down.
pub struct FailingAnalytics;

#[async_trait]
impl UsageAnalytics for FailingAnalytics {
    async fn record(&self, _entry: &UsageRecord) -> Result<(), CoreError> {
        Err(CoreError::Internal("analytics unavailable".into()))
    }
}

/// Notifier with no listeners.
pub struct FailingNotifier;

impl ConversionNotifier for FailingNotifier {
    fn notify(&self, _notice: ConversionNotice) -> Result<(), CoreError> {
        Err(CoreError::Internal("no subscribers".into()))
    }
}

/// Credit store whose refund writes lose a set number of balance races.
pub struct ContendedCredits {
    inner: Arc<MemoryStore>,
    lost_refunds: AtomicU32,
}

impl ContendedCredits {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            lost_refunds: AtomicU32::new(0),
        }
    }

    pub fn lose_next_refunds(&self, count: u32) {
        self.lost_refunds.store(count, Ordering::SeqCst);
    }

    fn lose_one(&self) -> bool {
        self.lost_refunds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl CreditStore for ContendedCredits {
    async fn find_account(&self, user_id: DbId) -> Result<Option<CreditAccount>, CoreError> {
        self.inner.find_account(user_id).await
    }

    async fn open_account(
        &self,
        user_id: DbId,
        tier: SubscriptionTier,
        credits: i32,
    ) -> Result<(CreditAccount, bool), CoreError> {
        self.inner.open_account(user_id, tier, credits).await
    }

    async fn compare_and_set_credits(
        &self,
        user_id: DbId,
        expected: i32,
        new_credits: i32,
    ) -> Result<bool, CoreError> {
        if new_credits > expected && self.lose_one() {
            return Ok(false);
        }
        self.inner
            .compare_and_set_credits(user_id, expected, new_credits)
            .await
    }

    async fn append_transaction(
        &self,
        entry: &NewCreditTransaction,
    ) -> Result<CreditTransaction, CoreError> {
        self.inner.append_transaction(entry).await
    }

    async fn list_transactions(
        &self,
        user_id: DbId,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, CoreError> {
        self.inner.list_transactions(user_id, limit).await
    }

    async fn list_conversion_transactions(
        &self,
        conversion_id: ConversionId,
    ) -> Result<Vec<CreditTransaction>, CoreError> {
        self.inner.list_conversion_transactions(conversion_id).await
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub storage: Arc<MemoryObjectStorage>,
    pub processor: Arc<ScriptedProcessor>,
    pub notifier: Arc<RecordingNotifier>,
    pub service: Arc<ConversionService>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        Self::assemble(
            store.clone(),
            store.clone(),
            store,
            notifier.clone(),
            notifier,
        )
    }

    /// Analytics and notifications fail on every terminal transition.
    pub fn with_failing_side_effects() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::assemble(
            store.clone(),
            store,
            Arc::new(FailingAnalytics),
            Arc::new(FailingNotifier),
            Arc::new(RecordingNotifier::default()),
        )
    }

    /// Refunds go through a [`ContendedCredits`] store.
    pub fn with_contended_refunds() -> (Self, Arc<ContendedCredits>) {
        let store = Arc::new(MemoryStore::new());
        let credits = Arc::new(ContendedCredits::new(store.clone()));
        let notifier = Arc::new(RecordingNotifier::default());
        let harness = Self::assemble(
            store.clone(),
            credits.clone(),
            store,
            notifier.clone(),
            notifier,
        );
        (harness, credits)
    }

    fn assemble(
        store: Arc<MemoryStore>,
        credits: Arc<dyn CreditStore>,
        analytics: Arc<dyn UsageAnalytics>,
        notify_to: Arc<dyn ConversionNotifier>,
        notifier: Arc<RecordingNotifier>,
    ) -> Self {
        let storage = Arc::new(MemoryObjectStorage::new());
        let processor = Arc::new(ScriptedProcessor::default());

        let service = Arc::new(ConversionService::new(ServiceDeps {
            conversions: store.clone(),
            ledger: Ledger::new(credits),
            storage: storage.clone(),
            processor: processor.clone(),
            analytics,
            notifier: notify_to,
        }));

        Self {
            store,
            storage,
            processor,
            notifier,
            service,
        }
    }

    pub async fn with_credits(credits: i32) -> Self {
        let harness = Self::new();
        harness.seed(credits).await;
        harness
    }

    pub async fn seed(&self, credits: i32) {
        self.store
            .seed_account(USER, SubscriptionTier::Free, credits)
            .await;
    }

    pub async fn balance(&self) -> i32 {
        self.store.balance(USER).await.unwrap()
    }

    /// Refund audit rows written for `id`.
    pub async fn refund_rows(&self, id: ConversionId) -> usize {
        self.store
            .transactions_for(USER)
            .await
            .iter()
            .filter(|t| {
                t.conversion_id == Some(id) && t.reason == CreditReason::ConversionFailedRefund
            })
            .count()
    }
}

/// A minimal PDF-looking upload of `size` bytes.
pub fn pdf(size: usize) -> SubmitConversion {
    let mut bytes = b"%PDF-1.7\n".to_vec();
    bytes.resize(size.max(bytes.len()), b' ');
    SubmitConversion {
        file_name: "statement.pdf".to_string(),
        document_type: Some("bank_statement".to_string()),
        bytes,
    }
}
