use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::{BTreeMap, HashMap};

use super::errors::OrderError;
use super::value_objects::{LineRequest, OrderLineItem, OrderTotals, ProductId};

// ============================================================================
// Pricing Calculator
// ============================================================================
//
// subtotal = Σ unit_price × quantity
// tax      = round2((subtotal − discount) × tax_rate)
// total    = subtotal − discount + tax
//
// Everything is `Decimal`; tax is the only rounded value.
//
// ============================================================================

/// Fractional digits carried by every monetary amount
pub const MONEY_SCALE: u32 = 2;

/// Source of current catalog prices
pub trait PriceLookup {
    fn unit_price(&self, product_id: &ProductId) -> Option<Decimal>;
}

impl PriceLookup for HashMap<ProductId, Decimal> {
    fn unit_price(&self, product_id: &ProductId) -> Option<Decimal> {
        self.get(product_id).copied()
    }
}

impl PriceLookup for BTreeMap<ProductId, Decimal> {
    fn unit_price(&self, product_id: &ProductId) -> Option<Decimal> {
        self.get(product_id).copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PricedOrder {
    pub lines: Vec<OrderLineItem>,
    pub totals: OrderTotals,
}

#[derive(Debug, Clone)]
pub struct PricingCalculator {
    tax_rate: Decimal,
}

impl PricingCalculator {
    pub fn new(tax_rate: Decimal) -> Self {
        Self { tax_rate }
    }

    pub fn tax_rate(&self) -> Decimal {
        self.tax_rate
    }

    pub fn price(
        &self,
        lines: &[LineRequest],
        discount: Decimal,
        catalog: &impl PriceLookup,
    ) -> Result<PricedOrder, OrderError> {
        validate_discount(discount)?;
        let discount = to_money(discount);

        let mut priced = Vec::with_capacity(lines.len());
        for line in lines {
            let unit_price = catalog
                .unit_price(&line.product_id)
                .map(to_money)
                .ok_or_else(|| OrderError::ProductNotFound(line.product_id.clone()))?;
            priced.push(OrderLineItem::new(line.product_id.clone(), line.quantity, unit_price));
        }

        let subtotal: Decimal = priced.iter().map(|line| line.line_total).sum();
        if discount > subtotal {
            return Err(OrderError::InvalidDiscount {
                discount,
                reason: "discount cannot exceed the order subtotal",
            });
        }

        let tax = self.tax_on(subtotal - discount);

        Ok(PricedOrder {
            lines: priced,
            totals: OrderTotals {
                subtotal,
                discount,
                tax,
                total: subtotal - discount + tax,
            },
        })
    }

    fn tax_on(&self, taxable: Decimal) -> Decimal {
        (taxable * self.tax_rate)
            .round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
    }
}

/// Fix an amount at two decimal places so it renders the same as NUMERIC(14,2)
pub fn to_money(mut amount: Decimal) -> Decimal {
    amount.rescale(MONEY_SCALE);
    amount
}

/// Shape checks that need no catalog: sign and precision
pub fn validate_discount(discount: Decimal) -> Result<(), OrderError> {
    if discount.is_sign_negative() && !discount.is_zero() {
        return Err(OrderError::InvalidDiscount {
            discount,
            reason: "discount cannot be negative",
        });
    }

    if discount.normalize().scale() > MONEY_SCALE {
        return Err(OrderError::InvalidDiscount {
            discount,
            reason: "discount cannot have more than two decimal places",
        });
    }

    Ok(())
}

// ============================================================================
// Unit Tests
// ============================================================================
