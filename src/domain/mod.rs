// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Sale aggregate, pricing, inventory and the coordinator that runs each
// operation as one unit of work. Storage and tracking are reached only
// through the `SalesStore` and `TrackingSink` traits.
//
// ============================================================================

pub mod order;
