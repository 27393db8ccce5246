use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::aggregate::{OrderAggregate, OrderDraft, StockEffect, Transition};
use super::commands::{CreateOrder, UpdateOrderStatus};
use super::errors::OrderError;
use super::events::{EventEnvelope, SaleEvent};
use super::inventory::{InventoryLedger, StockMovement};
use super::pricing::PricingCalculator;
use super::queries::{OrderFilter, OrderPage};
use super::value_objects::{OrderId, OrderStatus};
use crate::metrics::Metrics;
use crate::store::{SalesStore, UnitOfWork};
use crate::tracking::TrackingSynchronizer;

// ============================================================================
// Transaction Coordinator
// ============================================================================
//
// Orchestrates: validate → unit of work (locks, ledger, order write) →
// commit → metrics → tracking mirror
//
// Every mutating operation runs in exactly one unit of work. Any error inside
// the unit rolls it back; so does the timeout, because the unit is dropped
// with the timed-out future. Only after a successful commit is the sale
// event handed to the tracking mirror, whose outcome never changes the result.
//
// ============================================================================

/// Result of a committed status update
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub order_id: OrderId,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
}

/// Result of a committed deletion
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedOrder {
    pub order_id: OrderId,
    pub restored_units: i64,
}

#[derive(Clone)]
pub struct TransactionCoordinator {
    store: Arc<dyn SalesStore>,
    pricing: PricingCalculator,
    tracking: TrackingSynchronizer,
    metrics: Arc<Metrics>,
    transaction_timeout: Duration,
}

impl TransactionCoordinator {
    pub fn new(
        store: Arc<dyn SalesStore>,
        pricing: PricingCalculator,
        tracking: TrackingSynchronizer,
        metrics: Arc<Metrics>,
        transaction_timeout: Duration,
    ) -> Self {
        Self {
            store,
            pricing,
            tracking,
            metrics,
            transaction_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn SalesStore> {
        &self.store
    }

    pub fn tracking(&self) -> &TrackingSynchronizer {
        &self.tracking
    }

    // ========================================================================
    // Create
    // ========================================================================

    pub async fn create_order(&self, command: CreateOrder) -> Result<OrderAggregate, OrderError> {
        let result = self.create(command).await;
        self.observe("create", result)
    }

    async fn create(&self, command: CreateOrder) -> Result<OrderAggregate, OrderError> {
        let draft = OrderDraft::new(command)?;
        let correlation_id = Uuid::new_v4();

        tracing::debug!(
            order_id = %draft.order_id,
            customer_id = %draft.customer_id,
            lines = draft.lines.len(),
            %correlation_id,
            "Creating sale"
        );

        let (order, movements) = self
            .bounded("create", async {
                let mut uow = self.store.begin().await?;
                let outcome = self.create_within(uow.as_mut(), draft).await;
                settle(uow, outcome).await
            })
            .await?;

        self.metrics.orders_created.inc();
        self.metrics.record_movements(&movements);

        tracing::info!(
            order_id = %order.id,
            total = %order.totals.total,
            units = order.total_units(),
            %correlation_id,
            "Sale created"
        );

        self.publish(SaleEvent::Created(order.clone()), correlation_id)
            .await;
        Ok(order)
    }

    async fn create_within(
        &self,
        uow: &mut dyn UnitOfWork,
        draft: OrderDraft,
    ) -> Result<(OrderAggregate, Vec<StockMovement>), OrderError> {
        if uow.order_exists(&draft.order_id).await? {
            return Err(OrderError::DuplicateOrder(draft.order_id));
        }
        if !uow.customer_exists(&draft.customer_id).await? {
            return Err(OrderError::CustomerNotFound(draft.customer_id));
        }
        if !uow.sales_rep_exists(&draft.sales_rep_id).await? {
            return Err(OrderError::SalesRepNotFound(draft.sales_rep_id));
        }

        let mut ledger =
            InventoryLedger::lock(uow, draft.lines.iter().map(|line| &line.product_id)).await?;
        let priced = self.pricing.price(&draft.lines, draft.discount, &ledger)?;
        ledger.reserve_lines(&priced.lines)?;

        let order = OrderAggregate::open(draft, priced, Utc::now());
        let movements = ledger.flush(uow).await?;
        uow.insert_order(&order).await?;

        Ok((order, movements))
    }

    // ========================================================================
    // Update status
    // ========================================================================

    pub async fn update_status(&self, command: UpdateOrderStatus) -> Result<StatusChange, OrderError> {
        let result = self.change_status(command).await;
        self.observe("update_status", result)
    }

    async fn change_status(&self, command: UpdateOrderStatus) -> Result<StatusChange, OrderError> {
        // Malformed targets are rejected before any store access
        let target: OrderStatus = command.status.parse()?;
        let correlation_id = Uuid::new_v4();
        let order_id = command.order_id;
        let notes = command.notes;

        let (order, transition, movements) = self
            .bounded("update_status", async {
                let mut uow = self.store.begin().await?;
                let outcome = self
                    .change_status_within(uow.as_mut(), &order_id, target, notes)
                    .await;
                settle(uow, outcome).await
            })
            .await?;

        let change = StatusChange {
            order_id,
            old_status: transition.from,
            new_status: transition.to,
        };

        let Some(order) = order else {
            tracing::debug!(order_id = %change.order_id, status = %change.new_status, "Status unchanged");
            return Ok(change);
        };

        if !transition.is_noop() {
            self.metrics
                .record_transition(transition.from.as_str(), transition.to.as_str());
        }
        self.metrics.record_movements(&movements);

        tracing::info!(
            order_id = %order.id,
            from = %transition.from,
            to = %transition.to,
            stock_effect = ?transition.stock,
            %correlation_id,
            "Sale status updated"
        );

        self.publish(
            SaleEvent::StatusChanged {
                previous: transition.from,
                order,
            },
            correlation_id,
        )
        .await;
        Ok(change)
    }

    /// Returns the written order, or `None` when nothing needed writing
    async fn change_status_within(
        &self,
        uow: &mut dyn UnitOfWork,
        order_id: &OrderId,
        target: OrderStatus,
        notes: Option<String>,
    ) -> Result<(Option<OrderAggregate>, Transition, Vec<StockMovement>), OrderError> {
        let mut order = uow
            .lock_order(order_id)
            .await?
            .ok_or_else(|| OrderError::OrderNotFound(order_id.clone()))?;
        order.verify_totals()?;

        let transition = order.transition_to(target);
        if transition.is_noop() && notes.is_none() {
            return Ok((None, transition, Vec::new()));
        }

        let movements = match transition.stock {
            StockEffect::None => Vec::new(),
            StockEffect::Reserve => {
                let mut ledger = InventoryLedger::lock(uow, order.lines.iter().map(|l| &l.product_id)).await?;
                ledger.reserve_lines(&order.lines)?;
                ledger.flush(uow).await?
            }
            StockEffect::Restore => {
                let mut ledger = InventoryLedger::lock(uow, order.lines.iter().map(|l| &l.product_id)).await?;
                ledger.restore_lines(&order.lines)?;
                ledger.flush(uow).await?
            }
        };

        order.apply(&transition, notes, Utc::now());
        uow.update_order(&order).await?;

        Ok((Some(order), transition, movements))
    }

    // ========================================================================
    // Delete
    // ========================================================================

    pub async fn delete_order(&self, order_id: &OrderId) -> Result<DeletedOrder, OrderError> {
        let result = self.delete(order_id).await;
        self.observe("delete", result)
    }

    async fn delete(&self, order_id: &OrderId) -> Result<DeletedOrder, OrderError> {
        if order_id.is_blank() {
            return Err(OrderError::MissingField("orderId"));
        }
        let correlation_id = Uuid::new_v4();

        let (order, movements) = self
            .bounded("delete", async {
                let mut uow = self.store.begin().await?;
                let outcome = self.delete_within(uow.as_mut(), order_id).await;
                settle(uow, outcome).await
            })
            .await?;

        // Later than the `updated_at` of any write this deletion waited on
        let deleted_at = Utc::now();
        let restored_units: i64 = movements.iter().map(|movement| movement.delta).sum();
        self.metrics.orders_deleted.inc();
        self.metrics.record_movements(&movements);

        tracing::info!(
            order_id = %order.id,
            status = %order.status,
            restored_units,
            %correlation_id,
            "Sale deleted"
        );

        self.publish(
            SaleEvent::Deleted {
                order_id: order.id.clone(),
                customer_id: order.customer_id,
                sales_rep_id: order.sales_rep_id,
                status: order.status,
                total: order.totals.total,
                deleted_at,
            },
            correlation_id,
        )
        .await;

        Ok(DeletedOrder {
            order_id: order.id,
            restored_units,
        })
    }

    async fn delete_within(
        &self,
        uow: &mut dyn UnitOfWork,
        order_id: &OrderId,
    ) -> Result<(OrderAggregate, Vec<StockMovement>), OrderError> {
        let order = uow
            .lock_order(order_id)
            .await?
            .ok_or_else(|| OrderError::OrderNotFound(order_id.clone()))?;

        // A cancelled order already gave its stock back
        let movements = if order.status.holds_stock() {
            let mut ledger =
                InventoryLedger::lock(uow, order.lines.iter().map(|l| &l.product_id)).await?;
            ledger.restore_lines(&order.lines)?;
            ledger.flush(uow).await?
        } else {
            Vec::new()
        };

        uow.delete_order(order_id).await?;
        Ok((order, movements))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn get_order(&self, order_id: &OrderId) -> Result<OrderAggregate, OrderError> {
        let result: Result<OrderAggregate, OrderError> = async {
            self.store
                .fetch_order(order_id)
                .await?
                .ok_or_else(|| OrderError::OrderNotFound(order_id.clone()))
        }
        .await;
        self.observe("get", result)
    }

    pub async fn list_orders(&self, filter: OrderFilter) -> Result<OrderPage, OrderError> {
        let result: Result<OrderPage, OrderError> = async {
            filter.validate()?;
            Ok(self.store.list_orders(&filter).await?)
        }
        .await;
        self.observe("list", result)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Bound a unit of work by the transaction timeout and time it
    async fn bounded<T>(
        &self,
        operation: &'static str,
        work: impl Future<Output = Result<T, OrderError>>,
    ) -> Result<T, OrderError> {
        let timer = self
            .metrics
            .unit_duration
            .with_label_values(&[operation])
            .start_timer();

        let result = match tokio::time::timeout(self.transaction_timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    operation,
                    timeout_ms = self.transaction_timeout.as_millis() as u64,
                    "Unit of work timed out and was rolled back"
                );
                Err(OrderError::TransactionFailed)
            }
        };

        timer.observe_duration();
        result
    }

    fn observe<T>(&self, operation: &'static str, result: Result<T, OrderError>) -> Result<T, OrderError> {
        if let Err(err) = &result {
            self.metrics.record_failure(operation, err.kind());
            if err.is_retriable() {
                tracing::warn!(operation, kind = err.kind(), "Sale operation failed");
            } else {
                tracing::debug!(operation, kind = err.kind(), error = %err, "Sale operation rejected");
            }
        }
        result
    }

    async fn publish(&self, event: SaleEvent, correlation_id: Uuid) {
        let envelope = EventEnvelope::new(event, correlation_id);
        self.tracking.mirror(&envelope).await;
    }
}

/// Commit on success, roll back on failure
async fn settle<T>(
    uow: Box<dyn UnitOfWork>,
    outcome: Result<T, OrderError>,
) -> Result<T, OrderError> {
    match outcome {
        Ok(value) => {
            uow.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = uow.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback failed; the unit is discarded on drop");
            }
            Err(err)
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
