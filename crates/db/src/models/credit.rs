//! Rows of the `user_credits` and `credit_transactions` tables.

use serde::Serialize;
use sheetflow_core::credits::{CreditAccount, CreditReason, CreditTransaction};
use sheetflow_core::error::CoreError;
use sheetflow_core::status::{StatusId, SubscriptionTier};
use sheetflow_core::types::{ConversionId, DbId, Timestamp};
use sqlx::FromRow;

/// A row from the `user_credits` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserCreditRow {
    pub user_id: DbId,
    pub credits: i32,
    pub tier_id: StatusId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<UserCreditRow> for CreditAccount {
    type Error = CoreError;

    fn try_from(row: UserCreditRow) -> Result<Self, Self::Error> {
        let tier = SubscriptionTier::from_id(row.tier_id).ok_or_else(|| {
            CoreError::Internal(format!("Unknown subscription tier id {}", row.tier_id))
        })?;
        Ok(CreditAccount {
            user_id: row.user_id,
            credits: row.credits,
            tier,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// A row from the `credit_transactions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CreditTransactionRow {
    pub id: DbId,
    pub user_id: DbId,
    pub conversion_id: Option<ConversionId>,
    pub delta: i32,
    pub balance_before: i32,
    pub balance_after: i32,
    pub reason: String,
    pub created_at: Timestamp,
}

impl TryFrom<CreditTransactionRow> for CreditTransaction {
    type Error = CoreError;

    fn try_from(row: CreditTransactionRow) -> Result<Self, Self::Error> {
        let reason: CreditReason = row.reason.parse().map_err(CoreError::Internal)?;
        Ok(CreditTransaction {
            id: row.id,
            user_id: row.user_id,
            conversion_id: row.conversion_id,
            delta: row.delta,
            balance_before: row.balance_before,
            balance_after: row.balance_after,
            reason,
            created_at: row.created_at,
        })
    }
}
