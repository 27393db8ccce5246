use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use super::aggregate::OrderAggregate;
use super::value_objects::{CustomerId, OrderId, OrderStatus, SalesRepId};

// ============================================================================
// Sale Events - facts emitted after a unit of work commits
// ============================================================================
//
// Events are produced only once the primary store has committed. The tracking
// synchronizer consumes them; nothing reads them back to rebuild state.
//
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum SaleEvent {
    Created(OrderAggregate),
    StatusChanged {
        order: OrderAggregate,
        previous: OrderStatus,
    },
    /// Status and total as they were when the sale was deleted
    Deleted {
        order_id: OrderId,
        customer_id: CustomerId,
        sales_rep_id: SalesRepId,
        status: OrderStatus,
        total: Decimal,
        deleted_at: DateTime<Utc>,
    },
}

impl SaleEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SaleEvent::Created(_) => "SaleCreated",
            SaleEvent::StatusChanged { .. } => "SaleStatusChanged",
            SaleEvent::Deleted { .. } => "SaleDeleted",
        }
    }

    pub fn order_id(&self) -> &OrderId {
        match self {
            SaleEvent::Created(order) => &order.id,
            SaleEvent::StatusChanged { order, .. } => &order.id,
            SaleEvent::Deleted { order_id, .. } => order_id,
        }
    }
}

/// Event plus the metadata used for log correlation
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub correlation_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub event: SaleEvent,
}

impl EventEnvelope {
    pub fn new(event: SaleEvent, correlation_id: Uuid) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            correlation_id,
            occurred_at: Utc::now(),
            event,
        }
    }
}
