mod server;

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

pub use server::metrics_handler;

use crate::domain::order::StockMovement;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Sale lifecycle (created, status transitions, deleted)
// - Failed operations by error kind
// - Stock reserved and restored
// - Unit-of-work latency
// - Tracking mirror outcomes and circuit breaker state
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Sale lifecycle
    pub orders_created: IntCounter,
    pub status_transitions: IntCounterVec,
    pub orders_deleted: IntCounter,
    pub operation_failures: IntCounterVec,

    // Inventory
    pub stock_units: IntCounterVec,

    // Unit of work
    pub unit_duration: HistogramVec,

    // Tracking mirror
    pub tracking_writes: IntCounterVec,
    pub tracking_circuit_state: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let orders_created = IntCounter::new("sales_orders_created_total", "Total sales created")?;
        registry.register(Box::new(orders_created.clone()))?;

        let status_transitions = IntCounterVec::new(
            Opts::new("sales_status_transitions_total", "Committed sale status transitions"),
            &["from", "to"],
        )?;
        registry.register(Box::new(status_transitions.clone()))?;

        let orders_deleted = IntCounter::new("sales_orders_deleted_total", "Total sales deleted")?;
        registry.register(Box::new(orders_deleted.clone()))?;

        let operation_failures = IntCounterVec::new(
            Opts::new("sales_operation_failures_total", "Failed sale operations by error kind"),
            &["operation", "kind"],
        )?;
        registry.register(Box::new(operation_failures.clone()))?;

        let stock_units = IntCounterVec::new(
            Opts::new("inventory_stock_units_total", "Stock units moved by committed sales"),
            &["direction"],
        )?;
        registry.register(Box::new(stock_units.clone()))?;

        let unit_duration = HistogramVec::new(
            HistogramOpts::new("sales_unit_of_work_duration_seconds", "Unit-of-work duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation"],
        )?;
        registry.register(Box::new(unit_duration.clone()))?;

        let tracking_writes = IntCounterVec::new(
            Opts::new("tracking_writes_total", "Tracking mirror writes by outcome"),
            &["event_type", "outcome"],
        )?;
        registry.register(Box::new(tracking_writes.clone()))?;

        let tracking_circuit_state = IntGauge::new(
            "tracking_circuit_breaker_state",
            "Tracking circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(tracking_circuit_state.clone()))?;

        Ok(Self {
            registry,
            orders_created,
            status_transitions,
            orders_deleted,
            operation_failures,
            stock_units,
            unit_duration,
            tracking_writes,
            tracking_circuit_state,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_failure(&self, operation: &str, kind: &str) {
        self.operation_failures.with_label_values(&[operation, kind]).inc();
    }

    pub fn record_transition(&self, from: &str, to: &str) {
        self.status_transitions.with_label_values(&[from, to]).inc();
    }

    /// Count committed stock movements by direction
    pub fn record_movements(&self, movements: &[StockMovement]) {
        for movement in movements {
            let direction = if movement.delta < 0 { "reserved" } else { "restored" };
            self.stock_units
                .with_label_values(&[direction])
                .inc_by(movement.delta.unsigned_abs());
        }
    }

    pub fn record_tracking_write(&self, event_type: &str, success: bool) {
        let outcome = if success { "ok" } else { "failed" };
        self.tracking_writes.with_label_values(&[event_type, outcome]).inc();
    }

    pub fn update_tracking_circuit_state(&self, state: u8) {
        self.tracking_circuit_state.set(state as i64);
    }
}
