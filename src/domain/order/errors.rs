use rust_decimal::Decimal;

use super::value_objects::{CustomerId, OrderId, ProductId, SalesRepId};

// ============================================================================
// Order Errors
// ============================================================================
//
// Every variant maps to a stable `kind()` code. Messages are safe to show to
// callers; store-level details never reach them (they are logged where the
// store error is converted).
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("Order must contain at least one line item")]
    EmptyItems,

    #[error("Invalid quantity {quantity} for product {product_id}: quantity must be positive")]
    InvalidQuantity { product_id: ProductId, quantity: i32 },

    #[error("Invalid discount {discount}: {reason}")]
    InvalidDiscount { discount: Decimal, reason: &'static str },

    #[error("Invalid status '{0}'. Valid options: pending, confirmed, shipped, delivered, cancelled")]
    InvalidStatus(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Order {0} already exists")]
    DuplicateOrder(OrderId),

    #[error("Order {0} not found")]
    OrderNotFound(OrderId),

    #[error("Customer {0} not found")]
    CustomerNotFound(CustomerId),

    #[error("Sales rep {0} not found")]
    SalesRepNotFound(SalesRepId),

    #[error("Product {0} not found")]
    ProductNotFound(ProductId),

    #[error("Insufficient stock for product {product_id}. Available: {available}, Requested: {requested}")]
    InsufficientStock {
        product_id: ProductId,
        requested: i32,
        available: i32,
    },

    #[error("Stock for product {0} would exceed the supported maximum")]
    StockOverflow(ProductId),

    #[error("Order {0} totals do not match its line items")]
    InconsistentTotals(OrderId),

    #[error("Transaction failed; no changes were applied and the operation can be retried")]
    TransactionFailed,
}

/// Broad error classes; only `Infrastructure` failures are worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Conflict,
    NotFound,
    Infrastructure,
}

impl OrderError {
    /// Stable machine-readable code
    pub fn kind(&self) -> &'static str {
        match self {
            OrderError::MissingField(_) => "missing_field",
            OrderError::EmptyItems => "empty_items",
            OrderError::InvalidQuantity { .. } => "invalid_quantity",
            OrderError::InvalidDiscount { .. } => "invalid_discount",
            OrderError::InvalidStatus(_) => "invalid_status",
            OrderError::InvalidFilter(_) => "invalid_filter",
            OrderError::DuplicateOrder(_) => "duplicate_order",
            OrderError::OrderNotFound(_) => "order_not_found",
            OrderError::CustomerNotFound(_) => "customer_not_found",
            OrderError::SalesRepNotFound(_) => "sales_rep_not_found",
            OrderError::ProductNotFound(_) => "product_not_found",
            OrderError::InsufficientStock { .. } => "insufficient_stock",
            OrderError::StockOverflow(_) => "stock_overflow",
            OrderError::InconsistentTotals(_) => "inconsistent_totals",
            OrderError::TransactionFailed => "transaction_failed",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            OrderError::MissingField(_)
            | OrderError::EmptyItems
            | OrderError::InvalidQuantity { .. }
            | OrderError::InvalidDiscount { .. }
            | OrderError::InvalidStatus(_)
            | OrderError::InvalidFilter(_) => ErrorClass::Validation,
            OrderError::DuplicateOrder(_)
            | OrderError::InsufficientStock { .. }
            | OrderError::StockOverflow(_) => ErrorClass::Conflict,
            OrderError::OrderNotFound(_)
            | OrderError::CustomerNotFound(_)
            | OrderError::SalesRepNotFound(_)
            | OrderError::ProductNotFound(_) => ErrorClass::NotFound,
            OrderError::InconsistentTotals(_) | OrderError::TransactionFailed => {
                ErrorClass::Infrastructure
            }
        }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, OrderError::TransactionFailed)
    }
}
