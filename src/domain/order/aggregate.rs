use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::commands::CreateOrder;
use super::errors::OrderError;
use super::pricing::{to_money, validate_discount, PricedOrder};
use super::value_objects::{
    CustomerId, LineRequest, OrderId, OrderLineItem, OrderStatus, OrderTotals, ProductId,
    SalesRepId,
};

// ============================================================================
// Order Draft - validated create request, before any store access
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub sales_rep_id: SalesRepId,
    pub lines: Vec<LineRequest>,
    pub discount: Decimal,
    pub notes: String,
}

impl OrderDraft {
    /// Shape validation only. Whether the customer, rep and products exist
    /// is decided inside the unit of work.
    pub fn new(command: CreateOrder) -> Result<Self, OrderError> {
        if command.order_id.is_blank() {
            return Err(OrderError::MissingField("orderId"));
        }
        if command.customer_id.is_blank() {
            return Err(OrderError::MissingField("customerId"));
        }
        if command.sales_rep_id.is_blank() {
            return Err(OrderError::MissingField("salesRepId"));
        }
        if command.lines.is_empty() {
            return Err(OrderError::EmptyItems);
        }

        for line in &command.lines {
            if line.product_id.is_blank() {
                return Err(OrderError::MissingField("productId"));
            }
            if line.quantity <= 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: line.product_id.clone(),
                    quantity: line.quantity,
                });
            }
        }

        let discount = command.discount.unwrap_or(Decimal::ZERO);
        validate_discount(discount)?;
        let discount = to_money(discount);

        Ok(Self {
            order_id: command.order_id,
            customer_id: command.customer_id,
            sales_rep_id: command.sales_rep_id,
            lines: command.lines,
            discount,
            notes: command.notes.unwrap_or_default(),
        })
    }
}

// ============================================================================
// Status State Machine
// ============================================================================

/// Inventory consequence of a status change, applied by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockEffect {
    None,
    /// Take stock for every line (leaving `cancelled`)
    Reserve,
    /// Give stock back for every line (entering `cancelled`)
    Restore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub stock: StockEffect,
}

impl Transition {
    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }
}

/// Pure transition decision.
///
/// Stock is held by every status except `cancelled`, so the effect is decided
/// solely by whether the order crosses that boundary. Staying on the same
/// status (including `cancelled → cancelled`) never touches stock.
pub fn resolve_transition(from: OrderStatus, to: OrderStatus) -> Transition {
    let stock = match (from.holds_stock(), to.holds_stock()) {
        _ if from == to => StockEffect::None,
        (true, false) => StockEffect::Restore,
        (false, true) => StockEffect::Reserve,
        _ => StockEffect::None,
    };

    Transition { from, to, stock }
}

// ============================================================================
// Order Aggregate
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAggregate {
    #[serde(rename = "orderId")]
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub sales_rep_id: SalesRepId,
    pub status: OrderStatus,
    pub lines: Vec<OrderLineItem>,
    #[serde(flatten)]
    pub totals: OrderTotals,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderAggregate {
    /// New sale in `pending`, carrying the priced line snapshot
    pub fn open(draft: OrderDraft, priced: PricedOrder, now: DateTime<Utc>) -> Self {
        Self {
            id: draft.order_id,
            customer_id: draft.customer_id,
            sales_rep_id: draft.sales_rep_id,
            status: OrderStatus::Pending,
            lines: priced.lines,
            totals: priced.totals,
            notes: draft.notes,
            created_at: now,
            updated_at: now,
        }
    }

    /// Resolve a raw target status against the current one.
    /// Unknown targets fail with `InvalidStatus` and change nothing.
    pub fn transition(current: OrderStatus, target: &str) -> Result<Transition, OrderError> {
        let target: OrderStatus = target.parse()?;
        Ok(resolve_transition(current, target))
    }

    pub fn transition_to(&self, target: OrderStatus) -> Transition {
        resolve_transition(self.status, target)
    }

    /// Record a resolved transition. Stock effects are the caller's job.
    pub fn apply(&mut self, transition: &Transition, notes: Option<String>, now: DateTime<Utc>) {
        debug_assert_eq!(transition.from, self.status);
        self.status = transition.to;
        if let Some(notes) = notes {
            self.notes = notes;
        }
        self.updated_at = now;
    }

    /// Header totals must be derivable from the line items
    pub fn verify_totals(&self) -> Result<(), OrderError> {
        let inconsistent = || OrderError::InconsistentTotals(self.id.clone());

        if self.lines.is_empty() {
            return Err(inconsistent());
        }

        for line in &self.lines {
            if line.quantity <= 0 || line.line_total != line.unit_price * Decimal::from(line.quantity) {
                return Err(inconsistent());
            }
        }

        let subtotal: Decimal = self.lines.iter().map(|line| line.line_total).sum();
        let totals = &self.totals;
        if totals.subtotal != subtotal
            || totals.discount.is_sign_negative() && !totals.discount.is_zero()
            || totals.discount > subtotal
            || totals.total != totals.subtotal - totals.discount + totals.tax
        {
            return Err(inconsistent());
        }

        Ok(())
    }

    pub fn item_count(&self) -> usize {
        self.lines.len()
    }

    pub fn total_units(&self) -> i64 {
        self.lines.iter().map(|line| i64::from(line.quantity)).sum()
    }

    /// Units per product, summed over repeated lines
    pub fn units_by_product(&self) -> BTreeMap<ProductId, i64> {
        let mut units = BTreeMap::new();
        for line in &self.lines {
            *units.entry(line.product_id.clone()).or_insert(0) += i64::from(line.quantity);
        }
        units
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::money;
    use OrderStatus::*;

    fn command() -> CreateOrder {
        CreateOrder {
            order_id: OrderId::new("SALE-1"),
            customer_id: CustomerId::new("C1"),
            sales_rep_id: SalesRepId::new("R1"),
            lines: vec![LineRequest::new("P1", 2), LineRequest::new("P2", 1)],
            discount: None,
            notes: None,
        }
    }

    fn sample_order() -> OrderAggregate {
        let draft = OrderDraft::new(command()).unwrap();
        let lines = vec![
            OrderLineItem::new(ProductId::new("P1"), 2, money("10.00")),
            OrderLineItem::new(ProductId::new("P2"), 1, money("5.00")),
        ];
        let priced = PricedOrder {
            lines,
            totals: OrderTotals {
                subtotal: money("25.00"),
                discount: money("5.00"),
                tax: money("1.60"),
                total: money("21.60"),
            },
        };
        OrderAggregate::open(draft, priced, Utc::now())
    }

    #[test]
    fn test_draft_defaults() {
        let draft = OrderDraft::new(command()).unwrap();
        assert_eq!(draft.discount, Decimal::ZERO);
        assert_eq!(draft.notes, "");
    }

    #[test]
    fn test_draft_rejects_empty_lines() {
        let mut cmd = command();
        cmd.lines.clear();
        assert_eq!(OrderDraft::new(cmd).unwrap_err(), OrderError::EmptyItems);
    }

    #[test]
    fn test_draft_rejects_non_positive_quantity() {
        for quantity in [0, -3] {
            let mut cmd = command();
            cmd.lines[1].quantity = quantity;
            assert!(matches!(
                OrderDraft::new(cmd),
                Err(OrderError::InvalidQuantity { quantity: q, .. }) if q == quantity
            ));
        }
    }

    #[test]
    fn test_draft_requires_references() {
        let mut cmd = command();
        cmd.customer_id = CustomerId::new("");
        assert_eq!(OrderDraft::new(cmd).unwrap_err(), OrderError::MissingField("customerId"));

        let mut cmd = command();
        cmd.sales_rep_id = SalesRepId::new("  ");
        assert_eq!(OrderDraft::new(cmd).unwrap_err(), OrderError::MissingField("salesRepId"));

        let mut cmd = command();
        cmd.order_id = OrderId::new("");
        assert_eq!(OrderDraft::new(cmd).unwrap_err(), OrderError::MissingField("orderId"));
    }

    #[test]
    fn test_draft_rejects_negative_discount() {
        let mut cmd = command();
        cmd.discount = Some(money("-0.01"));
        assert_eq!(OrderDraft::new(cmd).unwrap_err().kind(), "invalid_discount");
    }

    #[test]
    fn test_draft_discount_trailing_zeros_are_trimmed_to_cents() {
        let mut cmd = command();
        cmd.discount = Some(money("1.500"));
        assert_eq!(OrderDraft::new(cmd).unwrap().discount.to_string(), "1.50");
    }

    #[test]
    fn test_opened_order_is_pending() {
        let order = sample_order();
        assert_eq!(order.status, Pending);
        assert_eq!(order.created_at, order.updated_at);
        assert_eq!(order.item_count(), 2);
        assert_eq!(order.total_units(), 3);
        assert!(order.verify_totals().is_ok());
    }

    #[test]
    fn test_transition_table() {
        // (from, to, expected stock effect) for every pair
        let table = [
            (Pending, Pending, StockEffect::None),
            (Pending, Confirmed, StockEffect::None),
            (Pending, Shipped, StockEffect::None),
            (Pending, Delivered, StockEffect::None),
            (Pending, Cancelled, StockEffect::Restore),
            (Confirmed, Pending, StockEffect::None),
            (Confirmed, Confirmed, StockEffect::None),
            (Confirmed, Shipped, StockEffect::None),
            (Confirmed, Delivered, StockEffect::None),
            (Confirmed, Cancelled, StockEffect::Restore),
            (Shipped, Pending, StockEffect::None),
            (Shipped, Confirmed, StockEffect::None),
            (Shipped, Shipped, StockEffect::None),
            (Shipped, Delivered, StockEffect::None),
            (Shipped, Cancelled, StockEffect::Restore),
            (Delivered, Pending, StockEffect::None),
            (Delivered, Confirmed, StockEffect::None),
            (Delivered, Shipped, StockEffect::None),
            (Delivered, Delivered, StockEffect::None),
            (Delivered, Cancelled, StockEffect::Restore),
            (Cancelled, Pending, StockEffect::Reserve),
            (Cancelled, Confirmed, StockEffect::Reserve),
            (Cancelled, Shipped, StockEffect::Reserve),
            (Cancelled, Delivered, StockEffect::Reserve),
            (Cancelled, Cancelled, StockEffect::None),
        ];

        assert_eq!(table.len(), OrderStatus::ALL.len() * OrderStatus::ALL.len());

        for (from, to, expected) in table {
            let transition = OrderAggregate::transition(from, to.as_str()).unwrap();
            assert_eq!(transition.from, from);
            assert_eq!(transition.to, to);
            assert_eq!(transition.stock, expected, "{from} -> {to}");
            assert_eq!(transition.is_noop(), from == to);
        }
    }

    #[test]
    fn test_unknown_target_is_invalid_status() {
        for current in OrderStatus::ALL {
            let err = OrderAggregate::transition(current, "processing").unwrap_err();
            assert_eq!(err, OrderError::InvalidStatus("processing".into()));
        }
    }

    #[test]
    fn test_apply_records_status_and_notes() {
        let mut order = sample_order();
        let later = order.created_at + chrono::Duration::minutes(5);
        let transition = order.transition_to(Cancelled);

        order.apply(&transition, Some("customer changed mind".into()), later);

        assert_eq!(order.status, Cancelled);
        assert_eq!(order.notes, "customer changed mind");
        assert_eq!(order.updated_at, later);
        assert!(order.created_at < order.updated_at);
    }

    #[test]
    fn test_apply_without_notes_keeps_existing() {
        let mut order = sample_order();
        order.notes = "keep me".into();
        let transition = order.transition_to(Shipped);
        order.apply(&transition, None, Utc::now());
        assert_eq!(order.notes, "keep me");
    }

    #[test]
    fn test_verify_totals_detects_tampering() {
        let mut order = sample_order();
        order.totals.total = money("99.99");
        assert_eq!(
            order.verify_totals().unwrap_err(),
            OrderError::InconsistentTotals(order.id.clone())
        );

        let mut order = sample_order();
        order.lines[0].line_total = money("1.00");
        assert!(order.verify_totals().is_err());
    }

    #[test]
    fn test_units_by_product_merges_repeated_lines() {
        let mut order = sample_order();
        order.lines.push(OrderLineItem::new(ProductId::new("P1"), 4, money("10.00")));
        let units = order.units_by_product();
        assert_eq!(units[&ProductId::new("P1")], 6);
        assert_eq!(units[&ProductId::new("P2")], 1);
    }

    #[test]
    fn test_order_serializes_flat_header() {
        let json = serde_json::to_value(sample_order()).unwrap();
        assert_eq!(json["orderId"], "SALE-1");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["total"], "21.60");
        assert_eq!(json["lines"][0]["unitPrice"], "10.00");
    }
}
