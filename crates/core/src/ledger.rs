//! Credit ledger: race-safe balance mutations with an audit trail.
//!
//! Every change is a read followed by a conditional write that only lands
//! if the balance is unchanged since the read. A lost race surfaces as
//! [`CoreError::ConcurrentModification`]; [`Ledger::adjust_with_retry`]
//! repeats the read-modify-write a bounded number of times.

use std::sync::Arc;

use crate::credits::{
    CreditAccount, CreditLimits, CreditReason, CreditTransaction, NewCreditTransaction,
    DEFAULT_TIER,
};
use crate::error::CoreError;
use crate::store::CreditStore;
use crate::types::{ConversionId, DbId};

/// Attempts made by [`Ledger::adjust_with_retry`] before giving up.
pub const MAX_ADJUST_ATTEMPTS: u32 = 5;

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn CreditStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn CreditStore>) -> Self {
        Self { store }
    }

    /// Open an account with the default tier's allotment, or return the
    /// existing one. A newly opened account gets a `signup_grant` audit row.
    pub async fn open_account(&self, user_id: DbId) -> Result<CreditAccount, CoreError> {
        let grant = DEFAULT_TIER.monthly_credits();
        let (account, created) = self.store.open_account(user_id, DEFAULT_TIER, grant).await?;

        if created {
            tracing::info!(user_id, credits = account.credits, "Credit account opened");
            self.audit(NewCreditTransaction {
                user_id,
                conversion_id: None,
                delta: account.credits,
                balance_before: 0,
                balance_after: account.credits,
                reason: CreditReason::SignupGrant,
            })
            .await;
        }

        Ok(account)
    }

    /// Current account, opening it on first access.
    pub async fn account(&self, user_id: DbId) -> Result<CreditAccount, CoreError> {
        match self.store.find_account(user_id).await? {
            Some(account) => Ok(account),
            None => self.open_account(user_id).await,
        }
    }

    /// Whether the user may start a conversion and how large it may be.
    pub async fn check_limits(&self, user_id: DbId) -> Result<CreditLimits, CoreError> {
        let account = self.account(user_id).await?;
        Ok(CreditLimits::for_account(&account))
    }

    /// Apply `delta` once and return the new balance.
    ///
    /// Debits that would go below zero fail with `InsufficientCredits`
    /// without writing. A lost race fails with `ConcurrentModification`.
    /// The audit row is best-effort: its failure is logged, never undone.
    pub async fn adjust(
        &self,
        user_id: DbId,
        delta: i32,
        reason: CreditReason,
        conversion_id: Option<ConversionId>,
    ) -> Result<i32, CoreError> {
        let account = self
            .store
            .find_account(user_id)
            .await?
            .ok_or_else(|| CoreError::not_found("CreditAccount", user_id))?;

        let current = account.credits;
        let proposed = current.saturating_add(delta);
        if delta < 0 && proposed < 0 {
            return Err(CoreError::InsufficientCredits {
                available: current,
                required: -delta,
            });
        }
        let new_balance = proposed.max(0);

        let applied = self
            .store
            .compare_and_set_credits(user_id, current, new_balance)
            .await?;
        if !applied {
            tracing::debug!(user_id, delta, %reason, "Credit adjustment lost a race");
            return Err(CoreError::ConcurrentModification {
                entity: "CreditAccount",
                id: user_id.to_string(),
            });
        }

        tracing::info!(
            user_id,
            delta,
            balance_before = current,
            balance_after = new_balance,
            %reason,
            "Credits adjusted",
        );

        self.audit(NewCreditTransaction {
            user_id,
            conversion_id,
            delta,
            balance_before: current,
            balance_after: new_balance,
            reason,
        })
        .await;

        Ok(new_balance)
    }

    /// [`adjust`](Self::adjust), repeated on `ConcurrentModification` up to
    /// [`MAX_ADJUST_ATTEMPTS`] times. Every other error returns immediately.
    pub async fn adjust_with_retry(
        &self,
        user_id: DbId,
        delta: i32,
        reason: CreditReason,
        conversion_id: Option<ConversionId>,
    ) -> Result<i32, CoreError> {
        let mut attempt = 1;
        loop {
            match self.adjust(user_id, delta, reason, conversion_id).await {
                Err(CoreError::ConcurrentModification { .. }) if attempt < MAX_ADJUST_ATTEMPTS => {
                    attempt += 1;
                    tokio::task::yield_now().await;
                }
                Err(e @ CoreError::ConcurrentModification { .. }) => {
                    tracing::warn!(
                        user_id,
                        delta,
                        %reason,
                        attempts = attempt,
                        "Credit adjustment still conflicting after retries",
                    );
                    return Err(e);
                }
                other => return other,
            }
        }
    }

    /// Restore the balance to the tier's monthly allotment.
    ///
    /// Balances already at or above the allotment are left untouched.
    pub async fn refill(&self, user_id: DbId) -> Result<i32, CoreError> {
        let mut attempt = 1;
        loop {
            let account = self.account(user_id).await?;
            let target = account.tier.monthly_credits();
            if account.credits >= target {
                return Ok(account.credits);
            }

            match self
                .adjust(
                    user_id,
                    target - account.credits,
                    CreditReason::MonthlyRefill,
                    None,
                )
                .await
            {
                Err(CoreError::ConcurrentModification { .. }) if attempt < MAX_ADJUST_ATTEMPTS => {
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Credits charged for `conversion_id` that no refund has returned yet,
    /// according to the audit trail.
    pub async fn outstanding_refund(&self, conversion_id: ConversionId) -> Result<i32, CoreError> {
        let net: i32 = self
            .store
            .list_conversion_transactions(conversion_id)
            .await?
            .iter()
            .filter(|t| {
                matches!(
                    t.reason,
                    CreditReason::ConversionStarted
                        | CreditReason::ConversionRetry
                        | CreditReason::ConversionFailedRefund
                )
            })
            .map(|t| t.delta)
            .sum();
        Ok((-net).max(0))
    }

    /// Recent audit rows for a user, newest first.
    pub async fn history(
        &self,
        user_id: DbId,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, CoreError> {
        self.store.list_transactions(user_id, limit).await
    }

    async fn audit(&self, entry: NewCreditTransaction) {
        if let Err(e) = self.store.append_transaction(&entry).await {
            tracing::error!(
                user_id = entry.user_id,
                delta = entry.delta,
                reason = %entry.reason,
                error = %e,
                "Failed to write credit audit row (balance change kept)",
            );
        }
    }
}
