use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use std::time::Duration;

use super::{escape_like, ProductRecord, SalesStore, StoreError, UnitOfWork};
use crate::domain::order::{
    CustomerId, OrderAggregate, OrderFilter, OrderId, OrderLineItem, OrderPage, OrderStatus,
    OrderSummary, OrderTotals, ProductId, SalesRepId,
};

// ============================================================================
// PostgreSQL Sales Store
// ============================================================================
//
// One sqlx transaction per unit of work. Row locks are taken with
// SELECT ... FOR UPDATE; the transaction-local lock and statement timeouts
// make a stuck unit fail instead of waiting forever. Dropping an uncommitted
// `Transaction` rolls it back.
//
// ============================================================================

const SCHEMA: &str = include_str!("schema.sql");

const SELECT_ORDER: &str = "SELECT order_id, customer_id, sales_rep_id, status, subtotal, \
     discount, tax, total, notes, created_at, updated_at FROM sales WHERE order_id = $1";

const SELECT_ORDER_FOR_UPDATE: &str = "SELECT order_id, customer_id, sales_rep_id, status, \
     subtotal, discount, tax, total, notes, created_at, updated_at FROM sales \
     WHERE order_id = $1 FOR UPDATE";

const SELECT_ITEMS: &str = "SELECT product_id, quantity, unit_price, line_total FROM sale_items \
     WHERE order_id = $1 ORDER BY line_no";

pub struct PgSalesStore {
    pool: PgPool,
    unit_timeout: Duration,
}

impl PgSalesStore {
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        unit_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(unit_timeout)
            .connect(database_url)
            .await?;

        tracing::info!(max_connections, "Connected to PostgreSQL");

        Ok(Self::from_pool(pool, unit_timeout))
    }

    pub fn from_pool(pool: PgPool, unit_timeout: Duration) -> Self {
        Self { pool, unit_timeout }
    }

    /// Read-only transaction whose statements all see one snapshot
    async fn read_snapshot(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    /// Create tables and indexes if they are missing
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        tracing::info!("Sales schema is up to date");
        Ok(())
    }
}

#[async_trait]
impl SalesStore for PgSalesStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let timeout_ms = self.unit_timeout.as_millis().to_string();
        sqlx::query(
            "SELECT set_config('lock_timeout', $1, true), set_config('statement_timeout', $1, true)",
        )
        .bind(&timeout_ms)
        .execute(&mut *tx)
        .await?;

        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<OrderAggregate>, StoreError> {
        // Header and items must come from the same snapshot
        let mut tx = self.read_snapshot().await?;
        let order = load_order(&mut tx, order_id, false).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<OrderPage, StoreError> {
        let mut tx = self.read_snapshot().await?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM sales s WHERE TRUE");
        push_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&mut *tx).await?;

        let mut page = QueryBuilder::<Postgres>::new(
            "SELECT s.order_id, s.customer_id, s.sales_rep_id, s.status, s.total, \
             s.created_at, s.updated_at, \
             (SELECT COUNT(*) FROM sale_items i WHERE i.order_id = s.order_id) AS item_count \
             FROM sales s WHERE TRUE",
        );
        push_filters(&mut page, filter);
        page.push(" ORDER BY s.created_at DESC, s.order_id LIMIT ")
            .push_bind(i64::from(filter.limit))
            .push(" OFFSET ")
            .push_bind(i64::from(filter.offset));

        let rows = page.build().fetch_all(&mut *tx).await?;
        tx.commit().await?;

        let orders = rows
            .iter()
            .map(summary_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(OrderPage {
            orders,
            total,
            limit: filter.limit,
            offset: filter.offset,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &OrderFilter) {
    if let Some(status) = filter.status {
        qb.push(" AND s.status = ").push_bind(status.as_str());
    }
    if let Some(customer_id) = &filter.customer_id {
        qb.push(" AND s.customer_id = ")
            .push_bind(customer_id.as_str().to_owned());
    }
    if let Some(sales_rep_id) = &filter.sales_rep_id {
        qb.push(" AND s.sales_rep_id = ")
            .push_bind(sales_rep_id.as_str().to_owned());
    }
    if let Some(from) = filter.created_from {
        qb.push(" AND s.created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.created_to {
        qb.push(" AND s.created_at <= ").push_bind(to);
    }
    if let Some(term) = filter.search_term() {
        let pattern = format!("%{}%", escape_like(term));
        qb.push(" AND (s.order_id ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR s.notes ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

fn summary_from_row(row: &PgRow) -> Result<OrderSummary, StoreError> {
    Ok(OrderSummary {
        order_id: OrderId::new(row.try_get::<String, _>("order_id")?),
        customer_id: CustomerId::new(row.try_get::<String, _>("customer_id")?),
        sales_rep_id: SalesRepId::new(row.try_get::<String, _>("sales_rep_id")?),
        status: parse_status(row)?,
        total: row.try_get("total")?,
        item_count: row.try_get("item_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_status(row: &PgRow) -> Result<OrderStatus, StoreError> {
    let raw: String = row.try_get("status")?;
    raw.parse()
        .map_err(|_| StoreError::Malformed(format!("unknown order status '{raw}'")))
}

async fn load_order(
    conn: &mut PgConnection,
    order_id: &OrderId,
    for_update: bool,
) -> Result<Option<OrderAggregate>, StoreError> {
    let sql = if for_update {
        SELECT_ORDER_FOR_UPDATE
    } else {
        SELECT_ORDER
    };

    let Some(header) = sqlx::query(sql)
        .bind(order_id.as_str())
        .fetch_optional(&mut *conn)
        .await?
    else {
        return Ok(None);
    };

    let items = sqlx::query(SELECT_ITEMS)
        .bind(order_id.as_str())
        .fetch_all(&mut *conn)
        .await?;

    let lines = items
        .iter()
        .map(|row| -> Result<OrderLineItem, StoreError> {
            Ok(OrderLineItem {
                product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
                quantity: row.try_get("quantity")?,
                unit_price: row.try_get("unit_price")?,
                line_total: row.try_get("line_total")?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let created_at: DateTime<Utc> = header.try_get("created_at")?;
    let updated_at: DateTime<Utc> = header.try_get("updated_at")?;

    Ok(Some(OrderAggregate {
        id: OrderId::new(header.try_get::<String, _>("order_id")?),
        customer_id: CustomerId::new(header.try_get::<String, _>("customer_id")?),
        sales_rep_id: SalesRepId::new(header.try_get::<String, _>("sales_rep_id")?),
        status: parse_status(&header)?,
        lines,
        totals: OrderTotals {
            subtotal: header.try_get("subtotal")?,
            discount: header.try_get("discount")?,
            tax: header.try_get("tax")?,
            total: header.try_get("total")?,
        },
        notes: header.try_get("notes")?,
        created_at,
        updated_at,
    }))
}

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn order_exists(&mut self, order_id: &OrderId) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM sales WHERE order_id = $1)")
                .bind(order_id.as_str())
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(exists)
    }

    async fn customer_exists(&mut self, customer_id: &CustomerId) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM customers WHERE customer_id = $1)")
                .bind(customer_id.as_str())
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(exists)
    }

    async fn sales_rep_exists(&mut self, sales_rep_id: &SalesRepId) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM sales_reps WHERE sales_rep_id = $1)")
                .bind(sales_rep_id.as_str())
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(exists)
    }

    async fn lock_product(
        &mut self,
        product_id: &ProductId,
    ) -> Result<Option<ProductRecord>, StoreError> {
        let row: Option<(Decimal, i32)> = sqlx::query_as(
            "SELECT unit_price, available FROM products WHERE product_id = $1 FOR UPDATE",
        )
        .bind(product_id.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(|(unit_price, available)| ProductRecord {
            product_id: product_id.clone(),
            unit_price,
            available,
        }))
    }

    async fn write_stock(&mut self, product_id: &ProductId, available: i32) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE products SET available = $2 WHERE product_id = $1")
            .bind(product_id.as_str())
            .bind(available)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Malformed(format!("product {product_id} vanished")));
        }
        Ok(())
    }

    async fn lock_order(&mut self, order_id: &OrderId) -> Result<Option<OrderAggregate>, StoreError> {
        load_order(&mut self.tx, order_id, true).await
    }

    async fn insert_order(&mut self, order: &OrderAggregate) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sales (
                order_id, customer_id, sales_rep_id, status,
                subtotal, discount, tax, total, notes, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(order.id.as_str())
        .bind(order.customer_id.as_str())
        .bind(order.sales_rep_id.as_str())
        .bind(order.status.as_str())
        .bind(order.totals.subtotal)
        .bind(order.totals.discount)
        .bind(order.totals.tax)
        .bind(order.totals.total)
        .bind(&order.notes)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| classify_insert(err, &order.id))?;

        for (line_no, line) in order.lines.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO sale_items (
                    order_id, line_no, product_id, quantity, unit_price, line_total
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(order.id.as_str())
            .bind(line_no as i32)
            .bind(line.product_id.as_str())
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line.line_total)
            .execute(&mut *self.tx)
            .await?;
        }

        Ok(())
    }

    async fn update_order(&mut self, order: &OrderAggregate) -> Result<(), StoreError> {
        sqlx::query("UPDATE sales SET status = $2, notes = $3, updated_at = $4 WHERE order_id = $1")
            .bind(order.id.as_str())
            .bind(order.status.as_str())
            .bind(&order.notes)
            .bind(order.updated_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_order(&mut self, order_id: &OrderId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sale_items WHERE order_id = $1")
            .bind(order_id.as_str())
            .execute(&mut *self.tx)
            .await?;
        sqlx::query("DELETE FROM sales WHERE order_id = $1")
            .bind(order_id.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PgUnitOfWork { tx } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let PgUnitOfWork { tx } = *self;
        tx.rollback().await?;
        Ok(())
    }
}

/// A concurrent create that lost the primary-key race
fn classify_insert(err: sqlx::Error, order_id: &OrderId) -> StoreError {
    let unique_violation = err
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation());

    if unique_violation {
        StoreError::DuplicateKey(order_id.clone())
    } else {
        StoreError::Database(err)
    }
}
