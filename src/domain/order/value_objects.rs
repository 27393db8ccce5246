use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::OrderError;

// ============================================================================
// Order Value Objects
// ============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Caller-supplied sale identifier, unique across the sales table
    OrderId
);
string_id!(ProductId);
string_id!(CustomerId);
string_id!(SalesRepId);

/// Sale lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Whether stock for the order's lines is currently held out of the catalog
    pub fn holds_stock(&self) -> bool {
        !matches!(self, OrderStatus::Cancelled)
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| OrderError::InvalidStatus(raw.to_string()))
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A requested line: product and quantity, before pricing
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LineRequest {
    pub product_id: ProductId,
    pub quantity: i32,
}

impl LineRequest {
    pub fn new(product_id: impl Into<String>, quantity: i32) -> Self {
        Self {
            product_id: ProductId::new(product_id),
            quantity,
        }
    }
}

/// A priced line item. The unit price is a snapshot taken when the sale was
/// created and never follows later catalog changes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineItem {
    pub product_id: ProductId,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

impl OrderLineItem {
    pub fn new(product_id: ProductId, quantity: i32, unit_price: Decimal) -> Self {
        Self {
            line_total: unit_price * Decimal::from(quantity),
            product_id,
            quantity,
            unit_price,
        }
    }
}

/// Monetary header of a sale
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::money;

    #[test]
    fn test_status_parses_case_insensitively() {
        assert_eq!("pending".parse::<OrderStatus>().unwrap(), OrderStatus::Pending);
        assert_eq!("Cancelled".parse::<OrderStatus>().unwrap(), OrderStatus::Cancelled);
        assert_eq!(" SHIPPED ".parse::<OrderStatus>().unwrap(), OrderStatus::Shipped);
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let err = "processing".parse::<OrderStatus>().unwrap_err();
        assert!(matches!(err, OrderError::InvalidStatus(ref raw) if raw == "processing"));
    }

    #[test]
    fn test_status_serialization_is_lowercase() {
        let json = serde_json::to_string(&OrderStatus::Delivered).unwrap();
        assert_eq!(json, "\"delivered\"");
        let back: OrderStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, OrderStatus::Delivered);
    }

    #[test]
    fn test_only_cancelled_releases_stock() {
        for status in OrderStatus::ALL {
            assert_eq!(status.holds_stock(), status != OrderStatus::Cancelled);
        }
    }

    #[test]
    fn test_line_total_is_exact() {
        let line = OrderLineItem::new(ProductId::new("P1"), 3, money("19.99"));
        assert_eq!(line.line_total, money("59.97"));
    }

    #[test]
    fn test_blank_ids_are_detected() {
        assert!(CustomerId::new("   ").is_blank());
        assert!(!CustomerId::new("C-1").is_blank());
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&OrderId::new("SALE-1")).unwrap();
        assert_eq!(json, "\"SALE-1\"");
    }
}
