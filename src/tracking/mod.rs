mod memory;
mod redis_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::order::{
    CustomerId, EventEnvelope, OrderAggregate, OrderId, OrderStatus, SaleEvent, SalesRepId,
};
use crate::metrics::Metrics;

pub use memory::MemoryTrackingStore;
pub use redis_store::RedisTrackingStore;

// ============================================================================
// Tracking Mirror
// ============================================================================
//
// A denormalized, non-authoritative copy of each sale kept in a secondary
// store for cheap lookups by customer and by sales rep, plus per-customer
// rollups (active order count, active order value, last order time). It is
// written only after the primary store has committed, once per operation,
// and its failures are logged and counted but never reach the caller.
//
// Mirror writes from concurrent requests can arrive out of commit order.
// Every record write carries a version (its `updatedAt`; a removal uses its
// deletion time) and a sink drops any record write older than the version it
// already holds, so a late update never resurrects a deleted sale. Rollup
// deltas are plain increments and are applied whatever the arrival order.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingRecord {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub sales_rep_id: SalesRepId,
    pub status: OrderStatus,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub item_count: usize,
    pub total_units: i64,
    /// Creation time as stored in the primary store
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&OrderAggregate> for TrackingRecord {
    fn from(order: &OrderAggregate) -> Self {
        Self {
            order_id: order.id.clone(),
            customer_id: order.customer_id.clone(),
            sales_rep_id: order.sales_rep_id.clone(),
            status: order.status,
            subtotal: order.totals.subtotal,
            discount: order.totals.discount,
            tax: order.totals.tax,
            total: order.totals.total,
            item_count: order.item_count(),
            total_units: order.total_units(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

pub fn tracking_key(order_id: &OrderId) -> String {
    format!("sale:{order_id}")
}

/// Ordering key for record writes, in microseconds
pub fn write_version(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

/// What a deleted sale leaves behind in the mirror
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingRemoval {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub sales_rep_id: SalesRepId,
    pub deleted_at: DateTime<Utc>,
}

impl TrackingRemoval {
    /// Strictly newer than any write that committed before the deletion
    pub fn version(&self) -> i64 {
        write_version(self.deleted_at) + 1
    }
}

/// Rollup of a customer's active (not cancelled) sales
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerStats {
    pub customer_id: CustomerId,
    pub total_orders: i64,
    pub total_value: Decimal,
    pub last_order_at: Option<DateTime<Utc>>,
}

impl CustomerStats {
    pub fn empty(customer_id: CustomerId) -> Self {
        Self {
            customer_id,
            total_orders: 0,
            total_value: Decimal::ZERO,
            last_order_at: None,
        }
    }

    pub fn apply(&mut self, delta: &StatsDelta) {
        self.total_orders += delta.orders;
        self.total_value += delta.value;
        if let Some(at) = delta.last_order_at {
            if self.last_order_at.map_or(true, |last| at > last) {
                self.last_order_at = Some(at);
            }
        }
    }
}

/// Change one sale event makes to its customer's rollup
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatsDelta {
    pub orders: i64,
    pub value: Decimal,
    pub last_order_at: Option<DateTime<Utc>>,
}

impl StatsDelta {
    pub fn for_event(event: &SaleEvent) -> Self {
        match event {
            SaleEvent::Created(order) => Self {
                orders: 1,
                value: order.totals.total,
                last_order_at: Some(order.created_at),
            },
            SaleEvent::StatusChanged { order, previous } => {
                match (previous.holds_stock(), order.status.holds_stock()) {
                    (true, false) => Self::retract(order.totals.total),
                    (false, true) => Self {
                        orders: 1,
                        value: order.totals.total,
                        last_order_at: None,
                    },
                    _ => Self::default(),
                }
            }
            SaleEvent::Deleted { status, total, .. } if status.holds_stock() => {
                Self::retract(*total)
            }
            SaleEvent::Deleted { .. } => Self::default(),
        }
    }

    fn retract(total: Decimal) -> Self {
        Self {
            orders: -1,
            value: -total,
            last_order_at: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.orders == 0 && self.value.is_zero() && self.last_order_at.is_none()
    }

    /// Value in whole cents, for stores that only add integers
    pub fn value_cents(&self) -> Option<i64> {
        self.value
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|cents| cents.round().to_i64())
    }
}

/// Newest first, ties broken by id
pub(crate) fn sort_records(records: &mut [TrackingRecord]) {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.order_id.cmp(&b.order_id))
    });
}

#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("tracking circuit breaker is open")]
    CircuitOpen,

    #[error("tracking store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("tracking store unavailable: {0}")]
    Unavailable(String),

    #[error("value out of range for the tracking store: {0}")]
    OutOfRange(String),
}

#[async_trait]
pub trait TrackingSink: Send + Sync {
    /// Upsert the record under `sale:{orderId}` and index it, unless the sink
    /// already holds a newer version. `stats` is applied to the record's
    /// customer either way.
    async fn put(&self, record: &TrackingRecord, stats: &StatsDelta) -> Result<(), TrackingError>;

    /// Remove the record and its index entries and fence off older writes.
    /// A missing record is fine.
    async fn remove(&self, removal: &TrackingRemoval, stats: &StatsDelta)
        -> Result<(), TrackingError>;

    async fn get(&self, order_id: &OrderId) -> Result<Option<TrackingRecord>, TrackingError>;

    async fn records_for_customer(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<TrackingRecord>, TrackingError>;

    async fn records_for_rep(
        &self,
        sales_rep_id: &SalesRepId,
    ) -> Result<Vec<TrackingRecord>, TrackingError>;

    async fn customer_stats(&self, customer_id: &CustomerId) -> Result<CustomerStats, TrackingError>;

    async fn ping(&self) -> Result<(), TrackingError>;
}

#[derive(Clone)]
pub struct TrackingSynchronizer {
    sink: Arc<dyn TrackingSink>,
    timeout: Duration,
    metrics: Arc<Metrics>,
}

impl TrackingSynchronizer {
    pub fn new(sink: Arc<dyn TrackingSink>, timeout: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            sink,
            timeout,
            metrics,
        }
    }

    pub fn sink(&self) -> &Arc<dyn TrackingSink> {
        &self.sink
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Mirror a committed event. Returns whether the mirror was updated.
    pub async fn mirror(&self, envelope: &EventEnvelope) -> bool {
        let event = &envelope.event;
        let stats = StatsDelta::for_event(event);
        let write = async {
            match event {
                SaleEvent::Created(order) | SaleEvent::StatusChanged { order, .. } => {
                    self.sink.put(&TrackingRecord::from(order), &stats).await
                }
                SaleEvent::Deleted {
                    order_id,
                    customer_id,
                    sales_rep_id,
                    deleted_at,
                    ..
                } => {
                    let removal = TrackingRemoval {
                        order_id: order_id.clone(),
                        customer_id: customer_id.clone(),
                        sales_rep_id: sales_rep_id.clone(),
                        deleted_at: *deleted_at,
                    };
                    self.sink.remove(&removal, &stats).await
                }
            }
        };

        let result = match tokio::time::timeout(self.timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(TrackingError::Timeout(self.timeout)),
        };

        let success = result.is_ok();
        self.metrics.record_tracking_write(event.event_type(), success);

        match result {
            Ok(()) => {
                tracing::debug!(
                    order_id = %event.order_id(),
                    event_type = event.event_type(),
                    event_id = %envelope.event_id,
                    correlation_id = %envelope.correlation_id,
                    "Tracking mirror updated"
                );
            }
            Err(e) => {
                tracing::warn!(
                    order_id = %event.order_id(),
                    event_type = event.event_type(),
                    correlation_id = %envelope.correlation_id,
                    error = %e,
                    "Tracking mirror update failed; primary store is unaffected"
                );
            }
        }

        success
    }
}
