//! Conversion state machine.
//!
//! ```text
//! (none) --submit--> pending --accepted--> processing --callback--> completed
//!                       |                       |
//!                       +--dispatch error--+    +--callback / timeout--> failed
//!                                          v                               |
//!                                        failed <------------------------- +
//!                                          |
//!                                          +--retry--> pending
//! ```
//!
//! Every status write is conditional on the status that was read, so
//! duplicate or out-of-order callbacks degrade to no-ops instead of
//! repeating side effects such as refunds.
//!
//! Refunds are settled against the audit trail: a failed conversion is
//! owed whatever it was charged minus what it was already refunded. A
//! refund that cannot land is reported to the caller and settled by the
//! next delivery for that conversion or the next stale sweep.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::conversion::{
    Conversion, ConversionSnapshot, NewConversion, Outcome, StatusPatch, DEFAULT_DOCUMENT_TYPE,
    DOCUMENT_TYPES,
};
use crate::credits::CreditReason;
use crate::error::CoreError;
use crate::ledger::Ledger;
use crate::status::ConversionStatus;
use crate::store::{
    ConversionNotice, ConversionNotifier, ConversionProcessor, ConversionStore, DispatchRequest,
    ObjectStorage, UsageAnalytics, UsageRecord,
};
use crate::types::{ConversionId, DbId, Timestamp};

/// Leading bytes of every PDF file.
const PDF_MAGIC: &[u8] = b"%PDF-";

/// Longest accepted original file name.
const MAX_FILE_NAME_LEN: usize = 255;

/// Default and maximum page size for listing.
pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 100;

/// How often a terminal transition re-reads after losing a status race.
const MAX_TRANSITION_ATTEMPTS: u32 = 3;

/// Error recorded when the sweeper gives up on a silent processor.
pub const TIMEOUT_ERROR_MESSAGE: &str = "Conversion timed out";

/// Rounds of [`Ledger::adjust_with_retry`] a refund gets per settlement.
const REFUND_ROUNDS: u32 = 3;

/// Pause before refund round `n + 1` is `n * REFUND_BACKOFF`.
const REFUND_BACKOFF: Duration = Duration::from_millis(20);

/// An upload to convert.
#[derive(Debug, Clone)]
pub struct SubmitConversion {
    pub file_name: String,
    pub document_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Result of applying a terminal outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeApplied {
    pub conversion: Conversion,
    /// `true` when the conversion was already terminal and nothing changed.
    pub duplicate: bool,
}

/// Collaborators of [`ConversionService`].
#[derive(Clone)]
pub struct ServiceDeps {
    pub conversions: Arc<dyn ConversionStore>,
    pub ledger: Ledger,
    pub storage: Arc<dyn ObjectStorage>,
    pub processor: Arc<dyn ConversionProcessor>,
    pub analytics: Arc<dyn UsageAnalytics>,
    pub notifier: Arc<dyn ConversionNotifier>,
}

#[derive(Clone)]
pub struct ConversionService {
    deps: ServiceDeps,
    /// Held while a refund is computed and paid.
    settle_lock: Arc<Mutex<()>>,
    /// Failed conversions whose refund has not landed yet.
    unsettled: Arc<Mutex<HashSet<ConversionId>>>,
}

impl ConversionService {
    pub fn new(deps: ServiceDeps) -> Self {
        Self {
            deps,
            settle_lock: Arc::new(Mutex::new(())),
            unsettled: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.deps.ledger
    }

    // -----------------------------------------------------------------------
    // Submit
    // -----------------------------------------------------------------------

    /// Reserve a credit, record the conversion, and dispatch it.
    ///
    /// A dispatch error fails the conversion and refunds the credit before
    /// this returns [`CoreError::DispatchFailure`].
    pub async fn submit(
        &self,
        owner_id: DbId,
        input: SubmitConversion,
    ) -> Result<Conversion, CoreError> {
        let document_type = validate_submission(&input)?;
        let file_size_bytes = input.bytes.len() as i64;

        let limits = self.deps.ledger.check_limits(owner_id).await?;
        if file_size_bytes > limits.max_file_size_bytes {
            return Err(CoreError::Validation(format!(
                "File is {file_size_bytes} bytes; the {} tier allows at most {} bytes",
                limits.tier, limits.max_file_size_bytes
            )));
        }
        if !limits.has_credits {
            return Err(CoreError::InsufficientCredits {
                available: limits.credits,
                required: 1,
            });
        }

        let id = uuid::Uuid::new_v4();
        let storage_key = format!("{owner_id}/{id}.pdf");
        self.deps.storage.put(&storage_key, &input.bytes).await?;

        if let Err(e) = self
            .deps
            .ledger
            .adjust_with_retry(owner_id, -1, CreditReason::ConversionStarted, Some(id))
            .await
        {
            self.discard_source(&storage_key).await;
            return Err(e);
        }

        let created = self
            .deps
            .conversions
            .create(&NewConversion {
                id,
                owner_id,
                file_name: input.file_name.trim().to_string(),
                file_size_bytes,
                document_type,
                storage_key: storage_key.clone(),
            })
            .await;
        let conversion = match created {
            Ok(conversion) => conversion,
            Err(e) => {
                tracing::error!(conversion_id = %id, error = %e, "Failed to record conversion");
                if let Err(refund_err) = self.credit_back(owner_id, id, 1).await {
                    tracing::error!(
                        conversion_id = %id,
                        user_id = owner_id,
                        error = %refund_err,
                        "Refund for unrecorded conversion failed; balance needs manual reconciliation",
                    );
                }
                self.discard_source(&storage_key).await;
                return Err(e);
            }
        };

        tracing::info!(
            conversion_id = %id,
            user_id = owner_id,
            file_size_bytes,
            "Conversion submitted",
        );

        match self.dispatch(&conversion, input.bytes).await {
            Ok(()) => self.mark_processing(id).await,
            Err(reason) => {
                self.apply_outcome(id, Outcome::Failed { error: reason.clone() })
                    .await?;
                Err(CoreError::DispatchFailure(reason))
            }
        }
    }

    /// `pending -> processing` once the processor accepted the job.
    ///
    /// If a fast callback already made the conversion terminal, the stored
    /// record is returned unchanged.
    pub async fn mark_processing(&self, id: ConversionId) -> Result<Conversion, CoreError> {
        let moved = self
            .deps
            .conversions
            .update_status(
                id,
                ConversionStatus::Pending,
                ConversionStatus::Processing,
                &StatusPatch::default(),
            )
            .await?;

        match moved {
            Some(conversion) => {
                tracing::info!(conversion_id = %id, "Conversion processing");
                Ok(conversion)
            }
            None => self.find(id).await,
        }
    }

    // -----------------------------------------------------------------------
    // Terminal outcomes
    // -----------------------------------------------------------------------

    /// Apply a completion or failure reported for `id`, exactly once.
    ///
    /// Already-terminal conversions are left alone and reported as
    /// duplicates; a failed one still gets any refund an earlier delivery
    /// could not pay. A failure refunds the reserved credit, and a refund
    /// that does not land fails the call with [`CoreError::Internal`] so the
    /// sender retries. Analytics and notifications are best-effort and never
    /// fail the call.
    pub async fn apply_outcome(
        &self,
        id: ConversionId,
        outcome: Outcome,
    ) -> Result<OutcomeApplied, CoreError> {
        let target = outcome.status();
        let patch = outcome.patch();

        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            let current = self.find(id).await?;
            if current.status.is_terminal() {
                if current.status == ConversionStatus::Failed {
                    let refunded = self.settle_refund(id).await?;
                    if refunded > 0 {
                        tracing::warn!(conversion_id = %id, refunded, "Settled an outstanding refund");
                    }
                }
                tracing::info!(
                    conversion_id = %id,
                    stored = %current.status,
                    reported = %target,
                    "Ignoring outcome for terminal conversion",
                );
                return Ok(OutcomeApplied {
                    conversion: current,
                    duplicate: true,
                });
            }
            if !current.status.can_transition(target) {
                return Err(CoreError::Conflict(format!(
                    "Cannot move conversion from {} to {target}",
                    current.status
                )));
            }

            let moved = self
                .deps
                .conversions
                .update_status(id, current.status, target, &patch)
                .await?;
            if let Some(conversion) = moved {
                tracing::info!(conversion_id = %id, status = %target, "Conversion finished");
                self.after_terminal(&conversion).await?;
                return Ok(OutcomeApplied {
                    conversion,
                    duplicate: false,
                });
            }
        }

        Err(CoreError::ConcurrentModification {
            entity: "Conversion",
            id: id.to_string(),
        })
    }

    /// Side effects of a transition this call won. Only the refund result
    /// is returned; it is reported after analytics and notification ran.
    async fn after_terminal(&self, conversion: &Conversion) -> Result<(), CoreError> {
        let settled = match conversion.status {
            ConversionStatus::Failed => self.settle_refund(conversion.id).await.map(|_| ()),
            _ => Ok(()),
        };

        let record = UsageRecord {
            conversion_id: conversion.id,
            owner_id: conversion.owner_id,
            outcome: conversion.status,
            processing_time_ms: conversion.metadata.processing_time_ms,
            pages: conversion.metadata.page_count,
            tables: conversion.metadata.tables_extracted,
        };
        if let Err(e) = self.deps.analytics.record(&record).await {
            tracing::warn!(conversion_id = %conversion.id, error = %e, "Usage analytics failed");
        }

        let notice = ConversionNotice {
            conversion_id: conversion.id,
            owner_id: conversion.owner_id,
            status: conversion.status,
            error_message: conversion.error_message.clone(),
        };
        if let Err(e) = self.deps.notifier.notify(notice) {
            tracing::warn!(conversion_id = %conversion.id, error = %e, "Notification failed");
        }

        settled
    }

    // -----------------------------------------------------------------------
    // Retry
    // -----------------------------------------------------------------------

    /// `failed -> pending`, then re-dispatch.
    ///
    /// The credit is only deducted once the processor accepts the job. A
    /// dispatch error puts the conversion back to `failed` without any
    /// credit movement.
    pub async fn retry(&self, owner_id: DbId, id: ConversionId) -> Result<Conversion, CoreError> {
        let conversion = self.find_owned(owner_id, id, "retry").await?;
        if conversion.status != ConversionStatus::Failed {
            return Err(CoreError::Conflict(
                "Only failed conversions can be retried".into(),
            ));
        }

        let limits = self.deps.ledger.check_limits(owner_id).await?;
        if !limits.has_credits {
            return Err(CoreError::InsufficientCredits {
                available: limits.credits,
                required: 1,
            });
        }

        let pending = self
            .deps
            .conversions
            .update_status(
                id,
                ConversionStatus::Failed,
                ConversionStatus::Pending,
                &StatusPatch::default(),
            )
            .await?
            .ok_or_else(|| CoreError::Conflict("Conversion changed while retrying".into()))?;

        let bytes = match self.deps.storage.get(&pending.storage_key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(conversion_id = %id, error = %e, "Source file unavailable for retry");
                self.revert_to_failed(id, "Source file is no longer available")
                    .await?;
                return Err(e.into());
            }
        };

        if let Err(reason) = self.dispatch(&pending, bytes).await {
            self.revert_to_failed(id, &reason).await?;
            return Err(CoreError::DispatchFailure(reason));
        }

        match self
            .deps
            .ledger
            .adjust_with_retry(owner_id, -1, CreditReason::ConversionRetry, Some(id))
            .await
        {
            Ok(_) => {
                tracing::info!(conversion_id = %id, user_id = owner_id, "Conversion retried");
                self.mark_processing(id).await
            }
            Err(e) => {
                tracing::warn!(
                    conversion_id = %id,
                    error = %e,
                    "Retry accepted by processor but credit deduction failed",
                );
                self.revert_to_failed(id, "Insufficient credits to retry conversion")
                    .await?;
                Err(e)
            }
        }
    }

    /// `pending -> failed` without a refund (nothing was charged).
    async fn revert_to_failed(&self, id: ConversionId, reason: &str) -> Result<(), CoreError> {
        let patch = StatusPatch {
            error_message: Some(reason.to_string()),
            ..Default::default()
        };
        let reverted = self
            .deps
            .conversions
            .update_status(id, ConversionStatus::Pending, ConversionStatus::Failed, &patch)
            .await?;
        if reverted.is_none() {
            tracing::info!(conversion_id = %id, "Conversion left pending before revert");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads and deletion
    // -----------------------------------------------------------------------

    pub async fn get(&self, owner_id: DbId, id: ConversionId) -> Result<Conversion, CoreError> {
        self.find_owned(owner_id, id, "view").await
    }

    pub async fn list(
        &self,
        owner_id: DbId,
        limit: Option<i64>,
    ) -> Result<Vec<Conversion>, CoreError> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        self.deps.conversions.list_by_owner(owner_id, limit).await
    }

    pub async fn snapshot(
        &self,
        owner_id: DbId,
        id: ConversionId,
        now: Timestamp,
    ) -> Result<ConversionSnapshot, CoreError> {
        let conversion = self.find_owned(owner_id, id, "view").await?;
        Ok(ConversionSnapshot::from_conversion(&conversion, now))
    }

    /// Snapshots of the owner's conversions among `ids`. Unknown ids and
    /// other users' conversions are left out.
    pub async fn snapshots(
        &self,
        owner_id: DbId,
        ids: &[ConversionId],
        now: Timestamp,
    ) -> Result<Vec<ConversionSnapshot>, CoreError> {
        let rows = self.deps.conversions.get_many(ids).await?;
        Ok(rows
            .iter()
            .filter(|c| c.owner_id == owner_id)
            .map(|c| ConversionSnapshot::from_conversion(c, now))
            .collect())
    }

    /// Delete a conversion with its audit and analytics rows.
    pub async fn delete(&self, owner_id: DbId, id: ConversionId) -> Result<(), CoreError> {
        let conversion = self.find_owned(owner_id, id, "delete").await?;
        if !self.deps.conversions.delete(id).await? {
            return Err(CoreError::not_found("Conversion", id));
        }
        self.discard_source(&conversion.storage_key).await;
        tracing::info!(conversion_id = %id, user_id = owner_id, "Conversion deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Stale conversions
    // -----------------------------------------------------------------------

    /// Fail (and refund) conversions stuck in `processing` since before
    /// `started_before`. Returns how many were failed by this call.
    ///
    /// Refunds left outstanding by earlier calls or deliveries are settled
    /// first.
    pub async fn fail_stale(&self, started_before: Timestamp) -> Result<usize, CoreError> {
        self.settle_outstanding().await;

        let stale = self
            .deps
            .conversions
            .list_stale_processing(started_before)
            .await?;

        let mut failed = 0;
        for conversion in stale {
            let outcome = Outcome::Failed {
                error: TIMEOUT_ERROR_MESSAGE.to_string(),
            };
            match self.apply_outcome(conversion.id, outcome).await {
                Ok(applied) if !applied.duplicate => failed += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(conversion_id = %conversion.id, error = %e, "Failed to expire conversion");
                }
            }
        }
        Ok(failed)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn find(&self, id: ConversionId) -> Result<Conversion, CoreError> {
        self.deps
            .conversions
            .get(id)
            .await?
            .ok_or_else(|| CoreError::not_found("Conversion", id))
    }

    /// Fetch a conversion and verify the caller owns it.
    async fn find_owned(
        &self,
        owner_id: DbId,
        id: ConversionId,
        action: &str,
    ) -> Result<Conversion, CoreError> {
        let conversion = self.find(id).await?;
        if conversion.owner_id != owner_id {
            return Err(CoreError::Forbidden(format!(
                "Cannot {action} another user's conversion"
            )));
        }
        Ok(conversion)
    }

    /// Returns the failure reason on error.
    async fn dispatch(&self, conversion: &Conversion, file_bytes: Vec<u8>) -> Result<(), String> {
        let request = DispatchRequest {
            conversion_id: conversion.id,
            file_name: conversion.file_name.clone(),
            document_type: conversion.document_type.clone(),
            file_bytes,
        };
        self.deps.processor.dispatch(request).await.map_err(|e| {
            tracing::warn!(conversion_id = %conversion.id, error = %e, "Dispatch failed");
            e.to_string()
        })
    }

    /// Failed conversions still waiting for a refund.
    pub async fn unsettled_refunds(&self) -> Vec<ConversionId> {
        self.unsettled.lock().await.iter().copied().collect()
    }

    async fn settle_outstanding(&self) {
        for id in self.unsettled_refunds().await {
            match self.settle_refund(id).await {
                Ok(0) => {}
                Ok(refunded) => {
                    tracing::info!(conversion_id = %id, refunded, "Outstanding refund settled");
                }
                Err(e) => {
                    tracing::warn!(conversion_id = %id, error = %e, "Outstanding refund still pending");
                }
            }
        }
    }

    /// Pay back whatever failed conversion `id` is still owed and return
    /// the credits refunded.
    ///
    /// Conversions that are gone or no longer `failed` are owed nothing
    /// here. A refund that keeps losing balance races is remembered for
    /// [`fail_stale`](Self::fail_stale) and reported as
    /// [`CoreError::Internal`].
    async fn settle_refund(&self, id: ConversionId) -> Result<i32, CoreError> {
        let _settling = self.settle_lock.lock().await;

        let conversion = match self.deps.conversions.get(id).await? {
            Some(c) if c.status == ConversionStatus::Failed => c,
            _ => {
                self.unsettled.lock().await.remove(&id);
                return Ok(0);
            }
        };

        let owed = self.deps.ledger.outstanding_refund(id).await?;
        if owed == 0 {
            self.unsettled.lock().await.remove(&id);
            return Ok(0);
        }

        match self.credit_back(conversion.owner_id, id, owed).await {
            Ok(_) => {
                self.unsettled.lock().await.remove(&id);
                Ok(owed)
            }
            Err(e) => {
                tracing::error!(
                    conversion_id = %id,
                    user_id = conversion.owner_id,
                    owed,
                    error = %e,
                    "Refund did not land",
                );
                self.unsettled.lock().await.insert(id);
                Err(CoreError::Internal(format!(
                    "Refund for conversion {id} is still pending"
                )))
            }
        }
    }

    /// Refund `credits`, backing off between rounds of balance races.
    async fn credit_back(
        &self,
        owner_id: DbId,
        id: ConversionId,
        credits: i32,
    ) -> Result<i32, CoreError> {
        let mut round = 1;
        loop {
            match self
                .deps
                .ledger
                .adjust_with_retry(owner_id, credits, CreditReason::ConversionFailedRefund, Some(id))
                .await
            {
                Err(CoreError::ConcurrentModification { .. }) if round < REFUND_ROUNDS => {
                    tokio::time::sleep(REFUND_BACKOFF * round).await;
                    round += 1;
                }
                other => return other,
            }
        }
    }

    async fn discard_source(&self, storage_key: &str) {
        if let Err(e) = self.deps.storage.delete(storage_key).await {
            tracing::warn!(storage_key, error = %e, "Failed to remove source file");
        }
    }
}

/// Check an upload and return the document type to record.
fn validate_submission(input: &SubmitConversion) -> Result<String, CoreError> {
    let name = input.file_name.trim();
    if name.is_empty() || name.len() > MAX_FILE_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "File name must be 1 to {MAX_FILE_NAME_LEN} characters"
        )));
    }
    if input.bytes.is_empty() {
        return Err(CoreError::Validation("File is empty".into()));
    }
    if !input.bytes.starts_with(PDF_MAGIC) {
        return Err(CoreError::Validation("Only PDF files are supported".into()));
    }

    let document_type = input
        .document_type
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_DOCUMENT_TYPE);
    if !DOCUMENT_TYPES.contains(&document_type) {
        return Err(CoreError::Validation(format!(
            "Unknown document type '{document_type}'"
        )));
    }
    Ok(document_type.to_string())
}
