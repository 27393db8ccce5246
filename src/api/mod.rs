pub mod orders;
pub mod response;
pub mod tracking;

use actix_web::error::InternalError;
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::order::TransactionCoordinator;
use crate::health::check_system;
use crate::metrics::{metrics_handler, Metrics};

// ============================================================================
// HTTP Surface
// ============================================================================
//
//   POST   /orders                       create
//   GET    /orders                       list (status, customerId, salesRepId,
//                                        from, to, search, limit, offset)
//   GET    /orders/{id}                  fetch
//   PUT    /orders/{id}/status           status transition
//   DELETE /orders/{id}                  delete
//   GET    /tracking/...                 tracking mirror views
//   GET    /health                       store and tracking health
//   GET    /metrics                      Prometheus exposition
//
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub coordinator: TransactionCoordinator,
    pub metrics: Arc<Metrics>,
    pub health_timeout: Duration,
}

impl AppState {
    pub fn new(coordinator: TransactionCoordinator, metrics: Arc<Metrics>) -> Self {
        Self {
            coordinator,
            metrics,
            health_timeout: Duration::from_secs(2),
        }
    }

    #[cfg(test)]
    pub(crate) fn from_fixture(fx: &crate::testing::Fixture) -> Self {
        Self {
            coordinator: fx.coordinator.clone(),
            metrics: fx.metrics.clone(),
            health_timeout: Duration::from_millis(200),
        }
    }
}

/// Register every route and extractor config on an `App`
pub fn configure(state: AppState) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        let json = web::JsonConfig::default().error_handler(|err, _req| {
            let resp = response::error(StatusCode::BAD_REQUEST, "invalid_body", err.to_string());
            InternalError::from_response(err, resp).into()
        });
        let query = web::QueryConfig::default().error_handler(|err, _req| {
            let resp = response::error(StatusCode::BAD_REQUEST, "invalid_query", err.to_string());
            InternalError::from_response(err, resp).into()
        });

        cfg.app_data(json)
            .app_data(query)
            .app_data(web::Data::new(state.metrics.clone()))
            .app_data(web::Data::new(state))
            .route("/health", web::get().to(health))
            .route("/metrics", web::get().to(metrics_handler))
            .configure(orders::routes)
            .configure(tracking::routes);
    }
}

async fn health(state: web::Data<AppState>) -> HttpResponse {
    let health = check_system(
        state.coordinator.store().as_ref(),
        state.coordinator.tracking().sink().as_ref(),
        state.health_timeout,
    )
    .await;

    let status = if health.status.is_unhealthy() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    HttpResponse::build(status).json(response::DataEnvelope { data: health })
}
