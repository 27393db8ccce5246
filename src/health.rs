use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::store::SalesStore;
use crate::tracking::TrackingSink;

// ============================================================================
// Health Checks
// ============================================================================
//
// The relational store is required: if it cannot be reached the engine is
// unhealthy. The tracking store is best effort: if it cannot be reached the
// engine keeps serving and reports itself degraded.
//
// ============================================================================

/// Health status of a component
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, HealthStatus::Degraded(_))
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy(_))
    }
}

/// Health information for a component
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    pub latency_ms: u64,
}

impl ComponentHealth {
    pub fn new(name: impl Into<String>, status: HealthStatus, latency: Duration) -> Self {
        Self {
            name: name.into(),
            status,
            last_check: Utc::now(),
            latency_ms: latency.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
}

impl SystemHealth {
    /// Worst component status wins
    pub fn from_components(components: Vec<ComponentHealth>) -> Self {
        let status = if let Some(c) = components.iter().find(|c| c.status.is_unhealthy()) {
            HealthStatus::Unhealthy(format!("{} is unhealthy", c.name))
        } else if let Some(c) = components.iter().find(|c| c.status.is_degraded()) {
            HealthStatus::Degraded(format!("{} is degraded", c.name))
        } else {
            HealthStatus::Healthy
        };

        Self { status, components }
    }
}

/// Ping both stores, each bounded by `timeout`
pub async fn check_system(
    store: &dyn SalesStore,
    tracking: &dyn TrackingSink,
    timeout: Duration,
) -> SystemHealth {
    let (store_health, tracking_health) = tokio::join!(
        probe("sales-store", timeout, store.ping(), HealthStatus::Unhealthy),
        probe("tracking-store", timeout, tracking.ping(), HealthStatus::Degraded),
    );

    let health = SystemHealth::from_components(vec![store_health, tracking_health]);
    if !health.status.is_healthy() {
        tracing::warn!(status = ?health.status, "Health check reported a problem");
    }
    health
}

async fn probe<E: std::fmt::Display>(
    name: &'static str,
    timeout: Duration,
    ping: impl Future<Output = Result<(), E>>,
    on_failure: fn(String) -> HealthStatus,
) -> ComponentHealth {
    let started = Instant::now();
    let status = match tokio::time::timeout(timeout, ping).await {
        Ok(Ok(())) => HealthStatus::Healthy,
        Ok(Err(e)) => on_failure(e.to_string()),
        Err(_) => on_failure(format!("no answer within {}ms", timeout.as_millis())),
    };

    ComponentHealth::new(name, status, started.elapsed())
}
