//! Redis tracking store integration tests.
//!
//! Run with: cargo test --test tracking_redis -- --ignored --nocapture
//!
//! Requires: REDIS_URL env var or Redis on localhost:6379
//!
//! Note: Tests use unique id prefixes to avoid data conflicts between runs.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;

use sales_engine::domain::order::{CustomerId, OrderId, OrderStatus, SalesRepId};
use sales_engine::tracking::{
    RedisTrackingStore, StatsDelta, TrackingRecord, TrackingRemoval, TrackingSink,
};
use sales_engine::utils::CircuitBreakerConfig;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/".to_string())
}

fn test_prefix() -> String {
    format!("it_{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}

fn store() -> RedisTrackingStore {
    RedisTrackingStore::new(&redis_url(), CircuitBreakerConfig::default())
        .expect("Failed to configure Redis")
}

fn record(prefix: &str, order: &str, total: &str, created_at: DateTime<Utc>) -> TrackingRecord {
    TrackingRecord {
        order_id: OrderId::new(format!("{prefix}-{order}")),
        customer_id: CustomerId::new(format!("{prefix}-C")),
        sales_rep_id: SalesRepId::new(format!("{prefix}-R")),
        status: OrderStatus::Pending,
        subtotal: total.parse().unwrap(),
        discount: Decimal::ZERO,
        tax: Decimal::ZERO,
        total: total.parse().unwrap(),
        item_count: 1,
        total_units: 1,
        created_at,
        updated_at: created_at,
    }
}

fn created(record: &TrackingRecord) -> StatsDelta {
    StatsDelta {
        orders: 1,
        value: record.total,
        last_order_at: Some(record.created_at),
    }
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_put_get_and_index_lookups() {
    let prefix = test_prefix();
    let store = store();
    store.ping().await.expect("Failed to reach Redis");

    let now = Utc::now();
    let older = record(&prefix, "S1", "10.00", now - ChronoDuration::minutes(5));
    let newer = record(&prefix, "S2", "2.50", now);
    store.put(&older, &created(&older)).await.unwrap();
    store.put(&newer, &created(&newer)).await.unwrap();

    let fetched = store.get(&older.order_id).await.unwrap();
    assert_eq!(fetched, Some(older.clone()));
    assert_eq!(store.get(&OrderId::new(format!("{prefix}-none"))).await.unwrap(), None);

    let by_customer = store.records_for_customer(&older.customer_id).await.unwrap();
    let ids: Vec<_> = by_customer.iter().map(|r| r.order_id.clone()).collect();
    assert_eq!(ids, vec![newer.order_id.clone(), older.order_id.clone()]);

    let by_rep = store.records_for_rep(&older.sales_rep_id).await.unwrap();
    assert_eq!(by_rep.len(), 2);

    let stats = store.customer_stats(&older.customer_id).await.unwrap();
    assert_eq!(stats.total_orders, 2);
    assert_eq!(stats.total_value, "12.50".parse::<Decimal>().unwrap());
    assert_eq!(
        stats.last_order_at.map(|at| at.timestamp_micros()),
        Some(now.timestamp_micros())
    );
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_late_put_after_remove_is_dropped() {
    let prefix = test_prefix();
    let store = store();

    let at = Utc::now();
    let original = record(&prefix, "S1", "10.00", at);
    store.put(&original, &created(&original)).await.unwrap();

    let mut updated = original.clone();
    updated.status = OrderStatus::Confirmed;
    updated.updated_at = at + ChronoDuration::seconds(1);

    let removal = TrackingRemoval {
        order_id: original.order_id.clone(),
        customer_id: original.customer_id.clone(),
        sales_rep_id: original.sales_rep_id.clone(),
        deleted_at: at + ChronoDuration::seconds(2),
    };
    let retract = StatsDelta {
        orders: -1,
        value: -original.total,
        last_order_at: None,
    };
    store.remove(&removal, &retract).await.unwrap();

    // The confirmation arrives after the deletion
    store.put(&updated, &StatsDelta::default()).await.unwrap();

    assert_eq!(store.get(&original.order_id).await.unwrap(), None);
    assert!(store
        .records_for_customer(&original.customer_id)
        .await
        .unwrap()
        .is_empty());

    let stats = store.customer_stats(&original.customer_id).await.unwrap();
    assert_eq!(stats.total_orders, 0);
    assert_eq!(stats.total_value, Decimal::ZERO);
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_out_of_order_updates_keep_newest() {
    let prefix = test_prefix();
    let store = store();

    let at = Utc::now();
    let original = record(&prefix, "S1", "10.00", at);
    let mut shipped = original.clone();
    shipped.status = OrderStatus::Shipped;
    shipped.updated_at = at + ChronoDuration::seconds(2);
    let mut confirmed = original.clone();
    confirmed.status = OrderStatus::Confirmed;
    confirmed.updated_at = at + ChronoDuration::seconds(1);

    store.put(&original, &created(&original)).await.unwrap();
    store.put(&shipped, &StatsDelta::default()).await.unwrap();
    store.put(&confirmed, &StatsDelta::default()).await.unwrap();

    let current = store.get(&original.order_id).await.unwrap().unwrap();
    assert_eq!(current.status, OrderStatus::Shipped);
}
