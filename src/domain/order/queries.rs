use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::errors::OrderError;
use super::value_objects::{CustomerId, OrderId, OrderStatus, SalesRepId};

// ============================================================================
// Order Queries - listing and filtering, served outside any unit of work
// ============================================================================

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub customer_id: Option<CustomerId>,
    pub sales_rep_id: Option<SalesRepId>,
    /// Inclusive lower bound on creation time
    pub created_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on creation time
    pub created_to: Option<DateTime<Utc>>,
    /// Case-insensitive substring match on order id or notes
    pub search: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for OrderFilter {
    fn default() -> Self {
        Self {
            status: None,
            customer_id: None,
            sales_rep_id: None,
            created_from: None,
            created_to: None,
            search: None,
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl OrderFilter {
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.limit == 0 || self.limit > MAX_PAGE_SIZE {
            return Err(OrderError::InvalidFilter(format!(
                "limit must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }

        if let (Some(from), Some(to)) = (self.created_from, self.created_to) {
            if from > to {
                return Err(OrderError::InvalidFilter(
                    "'from' must not be later than 'to'".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Search term with surrounding whitespace removed; blank terms disable search
    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub sales_rep_id: SalesRepId,
    pub status: OrderStatus,
    pub total: Decimal,
    pub item_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPage {
    pub orders: Vec<OrderSummary>,
    /// Number of orders matching the filter, ignoring pagination
    pub total: i64,
    pub limit: u32,
    pub offset: u32,
}
