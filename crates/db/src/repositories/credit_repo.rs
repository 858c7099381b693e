//! Repository for the `user_credits` and `credit_transactions` tables.

use sheetflow_core::credits::NewCreditTransaction;
use sheetflow_core::status::StatusId;
use sheetflow_core::types::{ConversionId, DbId};
use sqlx::PgPool;

use crate::models::credit::{CreditTransactionRow, UserCreditRow};

const ACCOUNT_COLUMNS: &str = "user_id, credits, tier_id, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "\
    id, user_id, conversion_id, delta, balance_before, balance_after, reason, created_at";

/// Balance reads, conditional balance writes, and audit rows.
pub struct CreditRepo;

impl CreditRepo {
    pub async fn find(pool: &PgPool, user_id: DbId) -> Result<Option<UserCreditRow>, sqlx::Error> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM user_credits WHERE user_id = $1");
        sqlx::query_as::<_, UserCreditRow>(&query)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    /// Insert an account unless one exists.
    ///
    /// Returns `None` when the user already had an account.
    pub async fn insert_if_absent(
        pool: &PgPool,
        user_id: DbId,
        tier_id: StatusId,
        credits: i32,
    ) -> Result<Option<UserCreditRow>, sqlx::Error> {
        let query = format!(
            "INSERT INTO user_credits (user_id, credits, tier_id) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (user_id) DO NOTHING \
             RETURNING {ACCOUNT_COLUMNS}"
        );
        sqlx::query_as::<_, UserCreditRow>(&query)
            .bind(user_id)
            .bind(credits)
            .bind(tier_id)
            .fetch_optional(pool)
            .await
    }

    /// Write `new_credits` only if the balance still equals `expected`.
    ///
    /// Returns `true` if the row was updated.
    pub async fn compare_and_set(
        pool: &PgPool,
        user_id: DbId,
        expected: i32,
        new_credits: i32,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE user_credits SET credits = $3, updated_at = NOW() \
             WHERE user_id = $1 AND credits = $2",
        )
        .bind(user_id)
        .bind(expected)
        .bind(new_credits)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn insert_transaction(
        pool: &PgPool,
        entry: &NewCreditTransaction,
    ) -> Result<CreditTransactionRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO credit_transactions \
                (user_id, conversion_id, delta, balance_before, balance_after, reason) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {TRANSACTION_COLUMNS}"
        );
        sqlx::query_as::<_, CreditTransactionRow>(&query)
            .bind(entry.user_id)
            .bind(entry.conversion_id)
            .bind(entry.delta)
            .bind(entry.balance_before)
            .bind(entry.balance_after)
            .bind(entry.reason.as_str())
            .fetch_one(pool)
            .await
    }

    /// Newest first.
    pub async fn list_transactions(
        pool: &PgPool,
        user_id: DbId,
        limit: i64,
    ) -> Result<Vec<CreditTransactionRow>, sqlx::Error> {
        let query = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM credit_transactions \
             WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2"
        );
        sqlx::query_as::<_, CreditTransactionRow>(&query)
            .bind(user_id)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Audit rows referencing one conversion, oldest first.
    pub async fn list_for_conversion(
        pool: &PgPool,
        conversion_id: ConversionId,
    ) -> Result<Vec<CreditTransactionRow>, sqlx::Error> {
        let query = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM credit_transactions \
             WHERE conversion_id = $1 \
             ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, CreditTransactionRow>(&query)
            .bind(conversion_id)
            .fetch_all(pool)
            .await
    }
}
