use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{ProductRecord, SalesStore, StoreError, UnitOfWork};
use crate::domain::order::{
    CustomerId, OrderAggregate, OrderFilter, OrderId, OrderPage, OrderSummary, ProductId,
    SalesRepId,
};

// ============================================================================
// In-Memory Sales Store
// ============================================================================
//
// Each unit of work holds the state lock for its whole lifetime and edits a
// private working copy, so units are fully serialized. Commit swaps the copy
// in; rollback or drop throws it away.
//
// Failure injection (commit failures, slow commits, unavailability) lets the
// coordinator's rollback and timeout paths run without a database.
//
// ============================================================================

#[derive(Debug, Clone, Default)]
struct MemoryState {
    products: HashMap<ProductId, ProductRecord>,
    customers: HashSet<CustomerId>,
    sales_reps: HashSet<SalesRepId>,
    orders: HashMap<OrderId, OrderAggregate>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_next_commit: AtomicBool,
    commit_delay_ms: AtomicU64,
    unavailable: AtomicBool,
}

#[derive(Clone, Default)]
pub struct MemorySalesStore {
    state: Arc<Mutex<MemoryState>>,
    faults: Arc<Faults>,
}

impl MemorySalesStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_product(&self, product_id: &str, unit_price: Decimal, available: i32) {
        let product_id = ProductId::new(product_id);
        self.state.lock().await.products.insert(
            product_id.clone(),
            ProductRecord {
                product_id,
                unit_price,
                available,
            },
        );
    }

    pub async fn add_customer(&self, customer_id: &str) {
        self.state.lock().await.customers.insert(CustomerId::new(customer_id));
    }

    pub async fn add_sales_rep(&self, sales_rep_id: &str) {
        self.state.lock().await.sales_reps.insert(SalesRepId::new(sales_rep_id));
    }

    /// Committed availability of a product
    pub async fn available(&self, product_id: &str) -> Option<i32> {
        self.state
            .lock()
            .await
            .products
            .get(&ProductId::new(product_id))
            .map(|product| product.available)
    }

    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    /// Next commit fails after all writes were staged
    pub fn fail_next_commit(&self) {
        self.faults.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Every commit sleeps before publishing its working copy
    pub fn delay_commits(&self, delay: Duration) {
        self.faults
            .commit_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store switched off".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SalesStore for MemorySalesStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        self.check_available()?;
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnit {
            guard,
            working,
            faults: self.faults.clone(),
        }))
    }

    async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<OrderAggregate>, StoreError> {
        self.check_available()?;
        Ok(self.state.lock().await.orders.get(order_id).cloned())
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<OrderPage, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let search = filter.search_term().map(str::to_lowercase);

        let mut matching: Vec<&OrderAggregate> = state
            .orders
            .values()
            .filter(|order| filter.status.map_or(true, |status| order.status == status))
            .filter(|order| filter.customer_id.as_ref().map_or(true, |id| &order.customer_id == id))
            .filter(|order| filter.sales_rep_id.as_ref().map_or(true, |id| &order.sales_rep_id == id))
            .filter(|order| filter.created_from.map_or(true, |from| order.created_at >= from))
            .filter(|order| filter.created_to.map_or(true, |to| order.created_at <= to))
            .filter(|order| {
                search.as_deref().map_or(true, |term| {
                    order.id.as_str().to_lowercase().contains(term)
                        || order.notes.to_lowercase().contains(term)
                })
            })
            .collect();

        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        let orders = matching
            .iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .map(|order| OrderSummary {
                order_id: order.id.clone(),
                customer_id: order.customer_id.clone(),
                sales_rep_id: order.sales_rep_id.clone(),
                status: order.status,
                total: order.totals.total,
                item_count: order.item_count() as i64,
                created_at: order.created_at,
                updated_at: order.updated_at,
            })
            .collect();

        Ok(OrderPage {
            orders,
            total: matching.len() as i64,
            limit: filter.limit,
            offset: filter.offset,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}

struct MemoryUnit {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    faults: Arc<Faults>,
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn order_exists(&mut self, order_id: &OrderId) -> Result<bool, StoreError> {
        Ok(self.working.orders.contains_key(order_id))
    }

    async fn customer_exists(&mut self, customer_id: &CustomerId) -> Result<bool, StoreError> {
        Ok(self.working.customers.contains(customer_id))
    }

    async fn sales_rep_exists(&mut self, sales_rep_id: &SalesRepId) -> Result<bool, StoreError> {
        Ok(self.working.sales_reps.contains(sales_rep_id))
    }

    async fn lock_product(
        &mut self,
        product_id: &ProductId,
    ) -> Result<Option<ProductRecord>, StoreError> {
        Ok(self.working.products.get(product_id).cloned())
    }

    async fn write_stock(&mut self, product_id: &ProductId, available: i32) -> Result<(), StoreError> {
        if available < 0 {
            return Err(StoreError::Malformed(format!(
                "negative stock {available} for product {product_id}"
            )));
        }
        let product = self
            .working
            .products
            .get_mut(product_id)
            .ok_or_else(|| StoreError::Malformed(format!("product {product_id} vanished")))?;
        product.available = available;
        Ok(())
    }

    async fn lock_order(&mut self, order_id: &OrderId) -> Result<Option<OrderAggregate>, StoreError> {
        Ok(self.working.orders.get(order_id).cloned())
    }

    async fn insert_order(&mut self, order: &OrderAggregate) -> Result<(), StoreError> {
        if self.working.orders.contains_key(&order.id) {
            return Err(StoreError::DuplicateKey(order.id.clone()));
        }
        self.working.orders.insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn update_order(&mut self, order: &OrderAggregate) -> Result<(), StoreError> {
        let stored = self
            .working
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| StoreError::Malformed(format!("order {} vanished", order.id)))?;
        stored.status = order.status;
        stored.notes = order.notes.clone();
        stored.updated_at = order.updated_at;
        Ok(())
    }

    async fn delete_order(&mut self, order_id: &OrderId) -> Result<(), StoreError> {
        self.working.orders.remove(order_id);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryUnit {
            mut guard,
            working,
            faults,
        } = *self;

        let delay = faults.commit_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if faults.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected commit failure".into()));
        }

        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
