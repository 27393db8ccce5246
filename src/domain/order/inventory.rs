use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

use super::errors::OrderError;
use super::pricing::PriceLookup;
use super::value_objects::{OrderLineItem, ProductId};
use crate::store::{ProductRecord, UnitOfWork};

// ============================================================================
// Inventory Ledger
// ============================================================================
//
// Holds the locked catalog rows touched by one unit of work. Rows are locked
// in ascending product-id order so that units touching overlapping products
// always queue on the same row first and cannot deadlock.
//
// reserve/restore only change the in-memory snapshot; `flush` writes the
// resulting absolute quantities back through the same unit.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockMovement {
    pub product_id: ProductId,
    /// Negative for reservations, positive for restorations
    pub delta: i64,
    pub available_after: i32,
}

#[derive(Debug, Default)]
pub struct InventoryLedger {
    products: BTreeMap<ProductId, ProductRecord>,
    locked_quantities: BTreeMap<ProductId, i32>,
    movements: Vec<StockMovement>,
}

impl InventoryLedger {
    /// Lock every product in `product_ids` through the unit of work
    pub async fn lock<'a>(
        uow: &mut dyn UnitOfWork,
        product_ids: impl IntoIterator<Item = &'a ProductId>,
    ) -> Result<Self, OrderError> {
        let ordered: BTreeSet<&ProductId> = product_ids.into_iter().collect();

        let mut records = Vec::with_capacity(ordered.len());
        for product_id in ordered {
            let record = uow
                .lock_product(product_id)
                .await?
                .ok_or_else(|| OrderError::ProductNotFound(product_id.clone()))?;
            records.push(record);
        }

        tracing::debug!(products = records.len(), "Locked product rows");
        Ok(Self::from_records(records))
    }

    pub fn from_records(records: impl IntoIterator<Item = ProductRecord>) -> Self {
        let products: BTreeMap<ProductId, ProductRecord> = records
            .into_iter()
            .map(|record| (record.product_id.clone(), record))
            .collect();
        let locked_quantities = products
            .iter()
            .map(|(id, record)| (id.clone(), record.available))
            .collect();

        Self {
            products,
            locked_quantities,
            movements: Vec::new(),
        }
    }

    pub fn available(&self, product_id: &ProductId) -> Option<i32> {
        self.products.get(product_id).map(|record| record.available)
    }

    /// Take `quantity` units. Fails without touching the snapshot when the
    /// product cannot cover it.
    pub fn reserve(&mut self, product_id: &ProductId, quantity: i32) -> Result<(), OrderError> {
        let record = self.record_mut(product_id)?;

        if quantity > record.available {
            return Err(OrderError::InsufficientStock {
                product_id: product_id.clone(),
                requested: quantity,
                available: record.available,
            });
        }

        record.available -= quantity;
        let available_after = record.available;
        self.movements.push(StockMovement {
            product_id: product_id.clone(),
            delta: -i64::from(quantity),
            available_after,
        });
        Ok(())
    }

    /// Give back `quantity` units
    pub fn restore(&mut self, product_id: &ProductId, quantity: i32) -> Result<(), OrderError> {
        let record = self.record_mut(product_id)?;

        record.available = record
            .available
            .checked_add(quantity)
            .ok_or_else(|| OrderError::StockOverflow(product_id.clone()))?;
        let available_after = record.available;
        self.movements.push(StockMovement {
            product_id: product_id.clone(),
            delta: i64::from(quantity),
            available_after,
        });
        Ok(())
    }

    /// Reserve every line in order; the first shortfall aborts
    pub fn reserve_lines(&mut self, lines: &[OrderLineItem]) -> Result<(), OrderError> {
        for line in lines {
            self.reserve(&line.product_id, line.quantity)?;
        }
        Ok(())
    }

    pub fn restore_lines(&mut self, lines: &[OrderLineItem]) -> Result<(), OrderError> {
        for line in lines {
            self.restore(&line.product_id, line.quantity)?;
        }
        Ok(())
    }

    pub fn movements(&self) -> &[StockMovement] {
        &self.movements
    }

    /// Write back every product whose quantity moved since it was locked
    pub async fn flush(self, uow: &mut dyn UnitOfWork) -> Result<Vec<StockMovement>, OrderError> {
        for (product_id, record) in &self.products {
            if self.locked_quantities.get(product_id) != Some(&record.available) {
                uow.write_stock(product_id, record.available).await?;
            }
        }
        Ok(self.movements)
    }

    fn record_mut(&mut self, product_id: &ProductId) -> Result<&mut ProductRecord, OrderError> {
        self.products
            .get_mut(product_id)
            .ok_or_else(|| OrderError::ProductNotFound(product_id.clone()))
    }
}

impl PriceLookup for InventoryLedger {
    fn unit_price(&self, product_id: &ProductId) -> Option<Decimal> {
        self.products.get(product_id).map(|record| record.unit_price)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
