// ============================================================================
// Order Domain - Business Logic for Sales
// ============================================================================
//
// This module contains ALL sale-specific code:
// - Value objects (ids, OrderStatus, line items, totals)
// - Commands and queries (CreateOrder, UpdateOrderStatus, OrderFilter)
// - Errors (OrderError enum)
// - Pricing (PricingCalculator)
// - Aggregate (OrderAggregate and the status state machine)
// - Inventory (InventoryLedger)
// - Events (SaleEvent, emitted after commit)
// - Coordinator (TransactionCoordinator, one unit of work per operation)
//
// ============================================================================

pub mod value_objects;
pub mod errors;
pub mod commands;
pub mod queries;
pub mod pricing;
pub mod aggregate;
pub mod inventory;
pub mod events;
pub mod coordinator;

// Re-export for convenience
pub use value_objects::*;
pub use errors::*;
pub use commands::*;
pub use queries::*;
pub use pricing::*;
pub use aggregate::*;
pub use inventory::*;
pub use events::*;
pub use coordinator::*;
