//! End-to-end batch passes over a real SQLite warehouse

mod common;

use common::{seeded_warehouse, TestWarehouse};
use feature_store_core::engine::derivations::AbsenceReason;
use feature_store_core::types::parse_timestamp;
use feature_store_core::{
    EntityKey, EntityKind, FeatureCache, FeatureName, FeatureValue, PassStatus,
    SqliteFeatureCache,
};
use std::sync::Arc;

#[tokio::test]
async fn test_pass_derives_every_feature() {
    let wh = seeded_warehouse();
    let context = wh.context().await;

    let report = context.engine.run_batch_pass().await.unwrap();
    assert_eq!(report.entities[&EntityKind::User], 2);
    assert_eq!(report.entities[&EntityKind::Quote], 2);
    assert_eq!(report.entities[&EntityKind::PaymentTransaction], 2);
    assert_eq!(report.values_written, 5);
    assert_eq!(report.absent[&AbsenceReason::NoPolicies], 2);
    assert_eq!(report.absent[&AbsenceReason::MissingValue], 1);
    assert_eq!(report.records_written(), 8);
    assert_eq!(report.rejected_inserts, 0);

    let cache = &context.cache;
    assert_eq!(
        cache
            .get_one(FeatureName::UserPaymentTransactionTime.as_str(), EntityKey(1))
            .await
            .unwrap(),
        Some(FeatureValue::Timestamp(
            parse_timestamp("2024-02-03 04:05:06").unwrap()
        ))
    );
    assert_eq!(
        cache
            .get_one(FeatureName::UserFailedTransactionsCount.as_str(), EntityKey(1))
            .await
            .unwrap(),
        Some(FeatureValue::Count(1))
    );
    assert_eq!(
        cache
            .get_one(FeatureName::QuoteCreationBindingTime.as_str(), EntityKey(10))
            .await
            .unwrap(),
        Some(FeatureValue::DurationSecs(330))
    );
    assert_eq!(
        cache
            .get_one(FeatureName::PaymentTransactionType.as_str(), EntityKey(100))
            .await
            .unwrap(),
        Some(FeatureValue::Label("CREDIT".into()))
    );
}

#[tokio::test]
async fn test_unresolved_entities_are_known_without_value() {
    let wh = seeded_warehouse();
    let context = wh.context().await;
    context.engine.run_batch_pass().await.unwrap();

    // user 2 has no policies; quote 11 was never bound
    for feature in [
        FeatureName::UserPaymentTransactionTime,
        FeatureName::UserFailedTransactionsCount,
    ] {
        let records = context.cache.get_all(feature.as_str()).await.unwrap();
        assert_eq!(records.get(&EntityKey(2)), Some(&None));
    }
    let quotes = context
        .cache
        .get_all(FeatureName::QuoteCreationBindingTime.as_str())
        .await
        .unwrap();
    assert_eq!(quotes.len(), 2);
    assert_eq!(quotes[&EntityKey(11)], None);
}

#[tokio::test]
async fn test_empty_warehouse_provisions_empty_namespaces() {
    let wh = TestWarehouse::new();
    let context = wh.context().await;

    assert!(context.queries.discovery().await.unwrap().is_empty());

    let report = context.engine.run_batch_pass().await.unwrap();
    assert_eq!(report.records_written(), 0);

    let discovered = context.queries.discovery().await.unwrap();
    assert_eq!(
        discovered,
        vec![
            "user_payment_transaction_time",
            "user_failed_transactions_count",
            "quote_creation_binding_time",
            "payment_transaction_type",
        ]
    );
    for name in &discovered {
        assert!(context.cache.get_all(name).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_rerun_reflects_warehouse_changes() {
    let wh = seeded_warehouse();
    let context = wh.context().await;
    let first = context.engine.run_batch_pass().await.unwrap();

    // user 2 gains a policy with a failed payment
    wh.quote(12, 2, "2024-03-01 00:00:00.000000", Some("2024-03-01 00:01:00.000000"))
        .policy(20, 2, 12)
        .payment(102, 20, "2024-03-02 00:00:00.000000", "PREPAID", false);

    let second = context.engine.run_batch_pass().await.unwrap();
    assert_ne!(first.pass_id, second.pass_id);
    assert_eq!(second.values_written, 9);

    assert_eq!(
        context
            .cache
            .get_one(FeatureName::UserFailedTransactionsCount.as_str(), EntityKey(2))
            .await
            .unwrap(),
        Some(FeatureValue::Count(1))
    );
    assert_eq!(
        context.queries.discovery().await.unwrap().len(),
        FeatureName::ALL.len()
    );
    assert_eq!(
        context.engine.last_run().await.unwrap().status,
        PassStatus::Success
    );
}

#[tokio::test]
async fn test_sqlite_cache_backend_gives_same_results() {
    let wh = seeded_warehouse();
    let cache_path = wh.dir.path().join("cache.db");
    let context = wh
        .context_with(Arc::new(SqliteFeatureCache::new(&cache_path)))
        .await;

    let report = context.engine.run_batch_pass().await.unwrap();
    assert_eq!(report.records_written(), 8);

    let records = context
        .cache
        .get_all(FeatureName::PaymentTransactionType.as_str())
        .await
        .unwrap();
    assert_eq!(records[&EntityKey(101)], Some(FeatureValue::Label("DEBIT".into())));
    context.shutdown().await.unwrap();

    // records survive a reconnect
    let reopened = SqliteFeatureCache::new(&cache_path);
    reopened.connect().await.unwrap();
    assert_eq!(
        reopened
            .get_one(FeatureName::QuoteCreationBindingTime.as_str(), EntityKey(10))
            .await
            .unwrap(),
        Some(FeatureValue::DurationSecs(330))
    );
}

#[tokio::test]
async fn test_closed_warehouse_fails_pass() {
    let wh = seeded_warehouse();
    let gateway = wh.gateway();
    gateway.close();

    let context = feature_store_core::FeatureStoreContext::new(
        gateway,
        Arc::new(feature_store_core::InMemoryFeatureCache::new()),
        tokio_util::sync::CancellationToken::new(),
    );
    let err = context.engine.run_batch_pass().await.unwrap_err();
    assert!(err.is_fatal_to_pass());
    assert_eq!(
        context.engine.last_run().await.unwrap().status,
        PassStatus::Failed
    );
}
