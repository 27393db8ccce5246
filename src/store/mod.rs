mod memory;
mod postgres;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::order::{
    CustomerId, OrderAggregate, OrderError, OrderFilter, OrderId, OrderPage, ProductId, SalesRepId,
};

pub use memory::MemorySalesStore;
pub use postgres::PgSalesStore;

// ============================================================================
// Sales Store - relational persistence behind a unit-of-work seam
// ============================================================================
//
// A `SalesStore` hands out one `UnitOfWork` per operation. Everything done
// through a unit becomes visible together on `commit`; `rollback` (or simply
// dropping the unit) discards it.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("order {0} already exists")]
    DuplicateKey(OrderId),

    #[error("malformed row: {0}")]
    Malformed(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for OrderError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey(order_id) => OrderError::DuplicateOrder(order_id),
            other => {
                // Callers only ever see the generic, retriable failure
                tracing::error!(error = %other, "Store operation failed");
                OrderError::TransactionFailed
            }
        }
    }
}

/// Locked catalog row
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    pub product_id: ProductId,
    pub unit_price: Decimal,
    pub available: i32,
}

#[async_trait]
pub trait SalesStore: Send + Sync {
    /// Start a unit of work bounded by the store's own lock/statement timeouts
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;

    async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<OrderAggregate>, StoreError>;

    async fn list_orders(&self, filter: &OrderFilter) -> Result<OrderPage, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait UnitOfWork: Send {
    async fn order_exists(&mut self, order_id: &OrderId) -> Result<bool, StoreError>;

    async fn customer_exists(&mut self, customer_id: &CustomerId) -> Result<bool, StoreError>;

    async fn sales_rep_exists(&mut self, sales_rep_id: &SalesRepId) -> Result<bool, StoreError>;

    /// Read a catalog row and hold its lock until the unit ends
    async fn lock_product(&mut self, product_id: &ProductId)
        -> Result<Option<ProductRecord>, StoreError>;

    /// Overwrite availability with an absolute quantity
    async fn write_stock(&mut self, product_id: &ProductId, available: i32)
        -> Result<(), StoreError>;

    /// Read an order with its line items and hold its lock until the unit ends
    async fn lock_order(&mut self, order_id: &OrderId) -> Result<Option<OrderAggregate>, StoreError>;

    /// Insert header and line items. A clashing id fails with `DuplicateKey`.
    async fn insert_order(&mut self, order: &OrderAggregate) -> Result<(), StoreError>;

    /// Persist status, notes and modification time
    async fn update_order(&mut self, order: &OrderAggregate) -> Result<(), StoreError>;

    async fn delete_order(&mut self, order_id: &OrderId) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Escape `%`, `_` and `\` so a search term matches literally inside LIKE
pub(crate) fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_key_maps_to_duplicate_order() {
        let err: OrderError = StoreError::DuplicateKey(OrderId::new("SALE-1")).into();
        assert_eq!(err, OrderError::DuplicateOrder(OrderId::new("SALE-1")));
    }

    #[test]
    fn test_other_store_errors_are_hidden() {
        let err: OrderError = StoreError::Unavailable("connection reset by peer".into()).into();
        assert_eq!(err, OrderError::TransactionFailed);
        assert!(!err.to_string().contains("connection reset"));

        let err: OrderError = StoreError::Database(sqlx::Error::PoolTimedOut).into();
        assert_eq!(err, OrderError::TransactionFailed);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }
}
