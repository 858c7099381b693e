//! Integration tests for the PostgreSQL stores.
//!
//! Run with `DATABASE_URL` pointing at a server where the test user may
//! create databases, and `--include-ignored`.

use assert_matches::assert_matches;
use sqlx::PgPool;

use sheetflow_core::conversion::{ConversionMetadata, NewConversion, StatusPatch};
use sheetflow_core::credits::{CreditReason, NewCreditTransaction};
use sheetflow_core::error::CoreError;
use sheetflow_core::status::{ConversionStatus, SubscriptionTier};
use sheetflow_core::store::{ConversionStore, CreditStore, UsageAnalytics, UsageRecord};
use sheetflow_db::repositories::AnalyticsRepo;
use sheetflow_db::PgStore;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn new_conversion(owner_id: i64) -> NewConversion {
    let id = uuid::Uuid::new_v4();
    NewConversion {
        id,
        owner_id,
        file_name: "invoice.pdf".to_string(),
        file_size_bytes: 2048,
        document_type: "invoice".to_string(),
        storage_key: format!("{owner_id}/{id}.pdf"),
    }
}

// ---------------------------------------------------------------------------
// Credits
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn open_account_is_idempotent(pool: PgPool) {
    let store = PgStore::new(pool);

    let (first, created) = store
        .open_account(1, SubscriptionTier::Free, 5)
        .await
        .unwrap();
    assert!(created);
    assert_eq!(first.credits, 5);

    let (second, created) = store
        .open_account(1, SubscriptionTier::Pro, 100)
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(second.credits, 5);
    assert_eq!(second.tier, SubscriptionTier::Free);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn compare_and_set_only_applies_on_expected_balance(pool: PgPool) {
    let store = PgStore::new(pool);
    store.open_account(2, SubscriptionTier::Free, 5).await.unwrap();

    assert!(store.compare_and_set_credits(2, 5, 4).await.unwrap());
    assert!(!store.compare_and_set_credits(2, 5, 3).await.unwrap());

    let account = store.find_account(2).await.unwrap().unwrap();
    assert_eq!(account.credits, 4);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn negative_balance_is_rejected_by_schema(pool: PgPool) {
    let store = PgStore::new(pool);
    store.open_account(3, SubscriptionTier::Free, 0).await.unwrap();

    assert_matches!(
        store.compare_and_set_credits(3, 0, -1).await,
        Err(CoreError::Internal(_))
    );
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn transactions_list_newest_first(pool: PgPool) {
    let store = PgStore::new(pool);
    store.open_account(4, SubscriptionTier::Free, 5).await.unwrap();

    for (before, after, reason) in [
        (5, 4, CreditReason::ConversionStarted),
        (4, 5, CreditReason::ConversionFailedRefund),
    ] {
        store
            .append_transaction(&NewCreditTransaction {
                user_id: 4,
                conversion_id: None,
                delta: after - before,
                balance_before: before,
                balance_after: after,
                reason,
            })
            .await
            .unwrap();
    }

    let history = store.list_transactions(4, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].reason, CreditReason::ConversionFailedRefund);
    assert_eq!(history[1].reason, CreditReason::ConversionStarted);
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn status_updates_are_conditional(pool: PgPool) {
    let store = PgStore::new(pool);
    let input = new_conversion(10);
    let created = store.create(&input).await.unwrap();
    assert_eq!(created.status, ConversionStatus::Pending);

    let processing = store
        .update_status(
            input.id,
            ConversionStatus::Pending,
            ConversionStatus::Processing,
            &StatusPatch::default(),
        )
        .await
        .unwrap()
        .unwrap();
    assert!(processing.started_at.is_some());

    let patch = StatusPatch {
        download_url: Some("https://files.example.com/x.xlsx".into()),
        metadata: Some(ConversionMetadata {
            tables_extracted: Some(1),
            row_count: Some(12),
            page_count: Some(2),
            processing_time_ms: Some(900),
        }),
        ..Default::default()
    };
    let completed = store
        .update_status(
            input.id,
            ConversionStatus::Processing,
            ConversionStatus::Completed,
            &patch,
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(completed.metadata.row_count, Some(12));
    assert!(completed.completed_at.is_some());

    // Second writer expecting `processing` loses.
    let lost = store
        .update_status(
            input.id,
            ConversionStatus::Processing,
            ConversionStatus::Failed,
            &StatusPatch::default(),
        )
        .await
        .unwrap();
    assert!(lost.is_none());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn duplicate_conversion_id_conflicts(pool: PgPool) {
    let store = PgStore::new(pool);
    let input = new_conversion(11);
    store.create(&input).await.unwrap();
    assert_matches!(store.create(&input).await, Err(CoreError::Conflict(_)));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn delete_cascades_audit_and_analytics(pool: PgPool) {
    let store = PgStore::new(pool.clone());
    store.open_account(12, SubscriptionTier::Free, 5).await.unwrap();
    let input = new_conversion(12);
    store.create(&input).await.unwrap();

    store
        .append_transaction(&NewCreditTransaction {
            user_id: 12,
            conversion_id: Some(input.id),
            delta: -1,
            balance_before: 5,
            balance_after: 4,
            reason: CreditReason::ConversionStarted,
        })
        .await
        .unwrap();
    store
        .record(&UsageRecord {
            conversion_id: input.id,
            owner_id: 12,
            outcome: ConversionStatus::Failed,
            processing_time_ms: None,
            pages: None,
            tables: None,
        })
        .await
        .unwrap();

    assert!(store.delete(input.id).await.unwrap());
    assert!(!store.delete(input.id).await.unwrap());

    assert!(store.get(input.id).await.unwrap().is_none());
    assert!(store.list_transactions(12, 10).await.unwrap().is_empty());
    assert!(AnalyticsRepo::list_for_owner(&pool, 12)
        .await
        .unwrap()
        .is_empty());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn get_many_skips_unknown_ids(pool: PgPool) {
    let store = PgStore::new(pool);
    let a = new_conversion(13);
    let b = new_conversion(13);
    store.create(&a).await.unwrap();
    store.create(&b).await.unwrap();

    let rows = store
        .get_many(&[a.id, uuid::Uuid::new_v4(), b.id])
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert!(store.get_many(&[]).await.unwrap().is_empty());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn stale_processing_filters_by_start_time(pool: PgPool) {
    let store = PgStore::new(pool.clone());
    let input = new_conversion(14);
    store.create(&input).await.unwrap();
    store
        .update_status(
            input.id,
            ConversionStatus::Pending,
            ConversionStatus::Processing,
            &StatusPatch::default(),
        )
        .await
        .unwrap();

    sqlx::query("UPDATE conversions SET started_at = NOW() - INTERVAL '1 hour' WHERE id = $1")
        .bind(input.id)
        .execute(&pool)
        .await
        .unwrap();

    let cutoff = chrono::Utc::now() - chrono::Duration::minutes(30);
    let stale = store.list_stale_processing(cutoff).await.unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, input.id);
}
