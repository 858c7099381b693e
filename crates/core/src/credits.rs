//! Credit accounts, audit rows, reason codes, and tier limits.

use serde::{Deserialize, Serialize};

use crate::status::SubscriptionTier;
use crate::types::{ConversionId, DbId, Timestamp};

// ---------------------------------------------------------------------------
// Tier limits
// ---------------------------------------------------------------------------

const MB: i64 = 1024 * 1024;

impl SubscriptionTier {
    /// Credits granted at signup and restored by a monthly refill.
    pub fn monthly_credits(self) -> i32 {
        match self {
            Self::Free => 5,
            Self::Pro => 100,
            Self::Business => 500,
        }
    }

    /// Largest accepted upload for this tier, in bytes.
    pub fn max_file_size_bytes(self) -> i64 {
        match self {
            Self::Free => 10 * MB,
            Self::Pro => 50 * MB,
            Self::Business => 200 * MB,
        }
    }
}

/// Tier assigned to accounts opened without an explicit subscription.
pub const DEFAULT_TIER: SubscriptionTier = SubscriptionTier::Free;

// ---------------------------------------------------------------------------
// Reason codes
// ---------------------------------------------------------------------------

/// Why a balance changed. Stored verbatim in `credit_transactions.reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditReason {
    SignupGrant,
    ConversionStarted,
    ConversionFailedRefund,
    ConversionRetry,
    MonthlyRefill,
}

impl CreditReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SignupGrant => "signup_grant",
            Self::ConversionStarted => "conversion_started",
            Self::ConversionFailedRefund => "conversion_failed_refund",
            Self::ConversionRetry => "conversion_retry",
            Self::MonthlyRefill => "monthly_refill",
        }
    }
}

impl std::fmt::Display for CreditReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CreditReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signup_grant" => Ok(Self::SignupGrant),
            "conversion_started" => Ok(Self::ConversionStarted),
            "conversion_failed_refund" => Ok(Self::ConversionFailedRefund),
            "conversion_retry" => Ok(Self::ConversionRetry),
            "monthly_refill" => Ok(Self::MonthlyRefill),
            other => Err(format!("unknown credit reason: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// A user's credit balance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreditAccount {
    pub user_id: DbId,
    pub credits: i32,
    pub tier: SubscriptionTier,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// An immutable audit entry for one applied balance change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreditTransaction {
    pub id: DbId,
    pub user_id: DbId,
    pub conversion_id: Option<ConversionId>,
    pub delta: i32,
    pub balance_before: i32,
    pub balance_after: i32,
    pub reason: CreditReason,
    pub created_at: Timestamp,
}

/// Insert DTO for [`CreditTransaction`].
#[derive(Debug, Clone)]
pub struct NewCreditTransaction {
    pub user_id: DbId,
    pub conversion_id: Option<ConversionId>,
    pub delta: i32,
    pub balance_before: i32,
    pub balance_after: i32,
    pub reason: CreditReason,
}

/// Answer to "may this user start a conversion, and how large?".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreditLimits {
    pub has_credits: bool,
    pub credits: i32,
    pub max_file_size_bytes: i64,
    pub tier: SubscriptionTier,
}

impl CreditLimits {
    pub fn for_account(account: &CreditAccount) -> Self {
        Self {
            has_credits: account.credits > 0,
            credits: account.credits,
            max_file_size_bytes: account.tier.max_file_size_bytes(),
            tier: account.tier,
        }
    }
}
