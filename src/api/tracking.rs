use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use std::future::Future;

use super::response;
use super::AppState;
use crate::domain::order::{CustomerId, OrderId, SalesRepId};
use crate::tracking::TrackingError;

// Read-only views over the tracking mirror. The mirror is best effort, so a
// failure here is reported as 503 and never touches the primary store.

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/tracking")
            .route("/orders/{order_id}", web::get().to(tracked_order))
            .route("/customers/{customer_id}", web::get().to(customer_orders))
            .route("/customers/{customer_id}/stats", web::get().to(customer_stats))
            .route("/reps/{sales_rep_id}", web::get().to(rep_orders)),
    );
}

async fn tracked_order(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let order_id = OrderId::new(path.into_inner());
    let sink = state.coordinator.tracking().sink();

    match lookup(&state, sink.get(&order_id)).await {
        Ok(Some(record)) => response::ok(record),
        Ok(None) => response::error(
            StatusCode::NOT_FOUND,
            "order_not_tracked",
            format!("Order {order_id} is not in the tracking store"),
        ),
        Err(e) => unavailable(e),
    }
}

async fn customer_orders(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let customer_id = CustomerId::new(path.into_inner());
    let sink = state.coordinator.tracking().sink();

    match lookup(&state, sink.records_for_customer(&customer_id)).await {
        Ok(records) => response::ok(records),
        Err(e) => unavailable(e),
    }
}

/// Active-order rollup for one customer; unknown customers read as zero
async fn customer_stats(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let customer_id = CustomerId::new(path.into_inner());
    let sink = state.coordinator.tracking().sink();

    match lookup(&state, sink.customer_stats(&customer_id)).await {
        Ok(stats) => response::ok(stats),
        Err(e) => unavailable(e),
    }
}

async fn rep_orders(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let sales_rep_id = SalesRepId::new(path.into_inner());
    let sink = state.coordinator.tracking().sink();

    match lookup(&state, sink.records_for_rep(&sales_rep_id)).await {
        Ok(records) => response::ok(records),
        Err(e) => unavailable(e),
    }
}

async fn lookup<T>(
    state: &AppState,
    read: impl Future<Output = Result<T, TrackingError>>,
) -> Result<T, TrackingError> {
    let timeout = state.coordinator.tracking().timeout();
    tokio::time::timeout(timeout, read)
        .await
        .unwrap_or(Err(TrackingError::Timeout(timeout)))
}

fn unavailable(e: TrackingError) -> HttpResponse {
    tracing::warn!(error = %e, "Tracking lookup failed");
    response::error(
        StatusCode::SERVICE_UNAVAILABLE,
        "tracking_unavailable",
        "The tracking store is currently unavailable",
    )
}
