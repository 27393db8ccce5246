//! Shared test fixtures

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::order::{
    CustomerId, OrderAggregate, OrderId, OrderLineItem, OrderStatus, OrderTotals, PricingCalculator,
    ProductId, SalesRepId, TransactionCoordinator,
};
use crate::metrics::Metrics;
use crate::store::MemorySalesStore;
use crate::tracking::{
    CustomerStats, MemoryTrackingStore, StatsDelta, TrackingError, TrackingRecord, TrackingRemoval,
    TrackingSink, TrackingSynchronizer,
};

pub fn money(raw: &str) -> Decimal {
    raw.parse().unwrap()
}

/// Pending order for C1/R1 with one line of two P1 at 10.00 and 8% tax
pub fn sample_order(order_id: &str) -> OrderAggregate {
    let now = Utc::now();
    OrderAggregate {
        id: OrderId::new(order_id),
        customer_id: CustomerId::new("C1"),
        sales_rep_id: SalesRepId::new("R1"),
        status: OrderStatus::Pending,
        lines: vec![OrderLineItem::new(ProductId::new("P1"), 2, money("10.00"))],
        totals: OrderTotals {
            subtotal: money("20.00"),
            discount: Decimal::ZERO,
            tax: money("1.60"),
            total: money("21.60"),
        },
        notes: String::new(),
        created_at: now,
        updated_at: now,
    }
}

/// Coordinator over in-memory stores seeded with C1, R1,
/// P1 (10.00, 5 in stock) and P2 (5.00, 10 in stock)
pub struct Fixture {
    pub store: MemorySalesStore,
    pub tracking: Arc<MemoryTrackingStore>,
    pub metrics: Arc<Metrics>,
    pub coordinator: TransactionCoordinator,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::build(None, Duration::from_secs(5)).await
    }

    pub async fn with_timeout(timeout: Duration) -> Self {
        Self::build(None, timeout).await
    }

    pub async fn with_failing_tracking() -> Self {
        Self::build(Some(Arc::new(FailingTrackingSink)), Duration::from_secs(5)).await
    }

    async fn build(sink: Option<Arc<dyn TrackingSink>>, transaction_timeout: Duration) -> Self {
        let store = MemorySalesStore::new();
        store.add_customer("C1").await;
        store.add_sales_rep("R1").await;
        store.add_product("P1", money("10.00"), 5).await;
        store.add_product("P2", money("5.00"), 10).await;

        let tracking = Arc::new(MemoryTrackingStore::new());
        let sink: Arc<dyn TrackingSink> = match sink {
            Some(sink) => sink,
            None => tracking.clone(),
        };
        let metrics = Arc::new(Metrics::new().unwrap());

        let coordinator = TransactionCoordinator::new(
            Arc::new(store.clone()),
            PricingCalculator::new(money("0.08")),
            TrackingSynchronizer::new(sink, Duration::from_secs(1), metrics.clone()),
            metrics.clone(),
            transaction_timeout,
        );

        Self {
            store,
            tracking,
            metrics,
            coordinator,
        }
    }
}

/// Sink whose every call fails
pub struct FailingTrackingSink;

#[async_trait]
impl TrackingSink for FailingTrackingSink {
    async fn put(&self, _record: &TrackingRecord, _stats: &StatsDelta) -> Result<(), TrackingError> {
        Err(TrackingError::Unavailable("sink is down".into()))
    }

    async fn remove(
        &self,
        _removal: &TrackingRemoval,
        _stats: &StatsDelta,
    ) -> Result<(), TrackingError> {
        Err(TrackingError::Unavailable("sink is down".into()))
    }

    async fn get(&self, _order_id: &OrderId) -> Result<Option<TrackingRecord>, TrackingError> {
        Err(TrackingError::Unavailable("sink is down".into()))
    }

    async fn records_for_customer(
        &self,
        _customer_id: &CustomerId,
    ) -> Result<Vec<TrackingRecord>, TrackingError> {
        Err(TrackingError::Unavailable("sink is down".into()))
    }

    async fn records_for_rep(
        &self,
        _sales_rep_id: &SalesRepId,
    ) -> Result<Vec<TrackingRecord>, TrackingError> {
        Err(TrackingError::Unavailable("sink is down".into()))
    }

    async fn customer_stats(&self, _customer_id: &CustomerId) -> Result<CustomerStats, TrackingError> {
        Err(TrackingError::Unavailable("sink is down".into()))
    }

    async fn ping(&self) -> Result<(), TrackingError> {
        Err(TrackingError::Unavailable("sink is down".into()))
    }
}

/// Sink that answers only after `delay`
pub struct SlowTrackingSink {
    delay: Duration,
    inner: MemoryTrackingStore,
}

impl SlowTrackingSink {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: MemoryTrackingStore::new(),
        }
    }
}

#[async_trait]
impl TrackingSink for SlowTrackingSink {
    async fn put(&self, record: &TrackingRecord, stats: &StatsDelta) -> Result<(), TrackingError> {
        tokio::time::sleep(self.delay).await;
        self.inner.put(record, stats).await
    }

    async fn remove(&self, removal: &TrackingRemoval, stats: &StatsDelta) -> Result<(), TrackingError> {
        tokio::time::sleep(self.delay).await;
        self.inner.remove(removal, stats).await
    }

    async fn get(&self, order_id: &OrderId) -> Result<Option<TrackingRecord>, TrackingError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(order_id).await
    }

    async fn records_for_customer(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<TrackingRecord>, TrackingError> {
        tokio::time::sleep(self.delay).await;
        self.inner.records_for_customer(customer_id).await
    }

    async fn records_for_rep(
        &self,
        sales_rep_id: &SalesRepId,
    ) -> Result<Vec<TrackingRecord>, TrackingError> {
        tokio::time::sleep(self.delay).await;
        self.inner.records_for_rep(sales_rep_id).await
    }

    async fn customer_stats(&self, customer_id: &CustomerId) -> Result<CustomerStats, TrackingError> {
        tokio::time::sleep(self.delay).await;
        self.inner.customer_stats(customer_id).await
    }

    async fn ping(&self) -> Result<(), TrackingError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}
