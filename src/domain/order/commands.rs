use rust_decimal::Decimal;
use serde::Deserialize;

use super::value_objects::{CustomerId, LineRequest, OrderId, SalesRepId};

// ============================================================================
// Order Commands - Represent user intent
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrder {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    #[serde(alias = "salesPersonId")]
    pub sales_rep_id: SalesRepId,
    #[serde(alias = "items")]
    pub lines: Vec<LineRequest>,
    #[serde(default)]
    pub discount: Option<Decimal>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpdateOrderStatus {
    pub order_id: OrderId,
    /// Raw target status as supplied by the caller; parsed by the coordinator
    pub status: String,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_order_accepts_original_field_names() {
        let json = r#"{
            "orderId": "SALE-1",
            "customerId": "C1",
            "salesPersonId": "R1",
            "items": [{"productId": "P1", "quantity": 2}]
        }"#;

        let command: CreateOrder = serde_json::from_str(json).unwrap();
        assert_eq!(command.sales_rep_id.as_str(), "R1");
        assert_eq!(command.lines.len(), 1);
        assert_eq!(command.discount, None);
        assert_eq!(command.notes, None);
    }

    #[test]
    fn test_create_order_reads_decimal_discount() {
        let json = r#"{
            "orderId": "SALE-2",
            "customerId": "C1",
            "salesRepId": "R1",
            "lines": [{"productId": "P1", "quantity": 1}],
            "discount": "5.50",
            "notes": "rush"
        }"#;

        let command: CreateOrder = serde_json::from_str(json).unwrap();
        assert_eq!(command.discount, Some("5.50".parse().unwrap()));
        assert_eq!(command.notes.as_deref(), Some("rush"));
    }
}
