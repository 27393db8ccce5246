use actix_web::{web, HttpResponse};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;

use super::response;
use super::AppState;
use crate::domain::order::{
    CreateOrder, CustomerId, OrderError, OrderFilter, OrderId, OrderStatus, SalesRepId,
    UpdateOrderStatus, DEFAULT_PAGE_SIZE,
};

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/orders")
            .route("", web::post().to(create_order))
            .route("", web::get().to(list_orders))
            .route("/{order_id}", web::get().to(get_order))
            .route("/{order_id}", web::delete().to(delete_order))
            .route("/{order_id}/status", web::put().to(update_status)),
    );
}

async fn create_order(
    state: web::Data<AppState>,
    body: web::Json<CreateOrder>,
) -> Result<HttpResponse, OrderError> {
    let order = state.coordinator.create_order(body.into_inner()).await?;
    Ok(response::created(order))
}

async fn get_order(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, OrderError> {
    let order_id = OrderId::new(path.into_inner());
    let order = state.coordinator.get_order(&order_id).await?;
    Ok(response::ok(order))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
    #[serde(default)]
    pub notes: Option<String>,
}

async fn update_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<StatusRequest>,
) -> Result<HttpResponse, OrderError> {
    let StatusRequest { status, notes } = body.into_inner();
    let change = state
        .coordinator
        .update_status(UpdateOrderStatus {
            order_id: OrderId::new(path.into_inner()),
            status,
            notes,
        })
        .await?;
    Ok(response::ok(change))
}

async fn delete_order(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, OrderError> {
    let order_id = OrderId::new(path.into_inner());
    let deleted = state.coordinator.delete_order(&order_id).await?;
    Ok(response::ok(deleted))
}

/// Raw listing parameters; everything arrives as text and is parsed here
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOrdersQuery {
    pub status: Option<String>,
    pub customer_id: Option<String>,
    pub sales_rep_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub search: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ListOrdersQuery {
    pub fn into_filter(self) -> Result<OrderFilter, OrderError> {
        let status = non_blank(self.status)
            .map(|raw| raw.parse::<OrderStatus>())
            .transpose()?;

        Ok(OrderFilter {
            status,
            customer_id: non_blank(self.customer_id).map(CustomerId::new),
            sales_rep_id: non_blank(self.sales_rep_id).map(SalesRepId::new),
            created_from: non_blank(self.from)
                .map(|raw| parse_bound(&raw, NaiveTime::MIN))
                .transpose()?,
            created_to: non_blank(self.to)
                .map(|raw| parse_bound(&raw, end_of_day()))
                .transpose()?,
            search: self.search,
            limit: self.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            offset: self.offset.unwrap_or(0),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN)
}

/// Accept RFC 3339 timestamps or bare dates; a bare date is pinned to `time` in UTC
fn parse_bound(raw: &str, time: NaiveTime) -> Result<DateTime<Utc>, OrderError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|date| date.and_time(time).and_utc())
        .map_err(|_| {
            OrderError::InvalidFilter(format!(
                "'{raw}' is not a date (YYYY-MM-DD) or RFC 3339 timestamp"
            ))
        })
}

async fn list_orders(
    state: web::Data<AppState>,
    query: web::Query<ListOrdersQuery>,
) -> Result<HttpResponse, OrderError> {
    let filter = query.into_inner().into_filter()?;
    let page = state.coordinator.list_orders(filter).await?;
    Ok(response::ok(page))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure;
    use crate::testing::Fixture;
    use actix_web::http::StatusCode;
    use actix_web::{test as actix_test, App};
    use serde_json::{json, Value};

    fn create_body(order_id: &str, quantity: i32) -> Value {
        json!({
            "orderId": order_id,
            "customerId": "C1",
            "salesRepId": "R1",
            "lines": [{"productId": "P1", "quantity": quantity}]
        })
    }

    #[actix_web::test]
    async fn test_create_then_get() {
        let fx = Fixture::new().await;
        let app = actix_test::init_service(App::new().configure(configure(AppState::from_fixture(&fx)))).await;

        let req = actix_test::TestRequest::post()
            .uri("/orders")
            .set_json(create_body("SALE-1", 2))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["data"]["orderId"], "SALE-1");
        assert_eq!(body["data"]["total"], "21.60");

        let req = actix_test::TestRequest::get().uri("/orders/SALE-1").to_request();
        let body: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["status"], "pending");
        assert_eq!(body["data"]["lines"][0]["productId"], "P1");

        assert_eq!(fx.store.available("P1").await, Some(3));
    }

    #[actix_web::test]
    async fn test_insufficient_stock_is_conflict() {
        let fx = Fixture::new().await;
        let app = actix_test::init_service(App::new().configure(configure(AppState::from_fixture(&fx)))).await;

        let req = actix_test::TestRequest::post()
            .uri("/orders")
            .set_json(create_body("SALE-1", 6))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["error"]["kind"], "insufficient_stock");
        assert_eq!(fx.store.available("P1").await, Some(5));
    }

    #[actix_web::test]
    async fn test_malformed_body_uses_error_envelope() {
        let fx = Fixture::new().await;
        let app = actix_test::init_service(App::new().configure(configure(AppState::from_fixture(&fx)))).await;

        let req = actix_test::TestRequest::post()
            .uri("/orders")
            .insert_header(("content-type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["error"]["kind"], "invalid_body");
    }

    #[actix_web::test]
    async fn test_status_update_and_delete() {
        let fx = Fixture::new().await;
        let app = actix_test::init_service(App::new().configure(configure(AppState::from_fixture(&fx)))).await;

        let req = actix_test::TestRequest::post()
            .uri("/orders")
            .set_json(create_body("SALE-1", 3))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::CREATED);

        let req = actix_test::TestRequest::put()
            .uri("/orders/SALE-1/status")
            .set_json(json!({"status": "Cancelled", "notes": "customer changed mind"}))
            .to_request();
        let body: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["oldStatus"], "pending");
        assert_eq!(body["data"]["newStatus"], "cancelled");
        assert_eq!(fx.store.available("P1").await, Some(5));

        let req = actix_test::TestRequest::put()
            .uri("/orders/SALE-1/status")
            .set_json(json!({"status": "lost"}))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = actix_test::TestRequest::delete().uri("/orders/SALE-1").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = actix_test::TestRequest::get().uri("/orders/SALE-1").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["error"]["kind"], "order_not_found");
    }

    #[actix_web::test]
    async fn test_list_filters_by_status() {
        let fx = Fixture::new().await;
        let app = actix_test::init_service(App::new().configure(configure(AppState::from_fixture(&fx)))).await;

        for (id, qty) in [("SALE-1", 1), ("SALE-2", 1)] {
            let req = actix_test::TestRequest::post()
                .uri("/orders")
                .set_json(create_body(id, qty))
                .to_request();
            assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::CREATED);
        }

        let req = actix_test::TestRequest::put()
            .uri("/orders/SALE-2/status")
            .set_json(json!({"status": "confirmed"}))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = actix_test::TestRequest::get()
            .uri("/orders?status=confirmed&customerId=C1")
            .to_request();
        let body: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["total"], 1);
        assert_eq!(body["data"]["orders"][0]["orderId"], "SALE-2");
        assert_eq!(body["data"]["limit"], 50);

        let req = actix_test::TestRequest::get().uri("/orders?status=lost").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = actix_test::TestRequest::get().uri("/orders?limit=abc").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["error"]["kind"], "invalid_query");
    }

    #[test]
    fn test_query_date_bounds() {
        let filter = ListOrdersQuery {
            from: Some("2024-03-01".into()),
            to: Some("2024-03-31".into()),
            ..Default::default()
        }
        .into_filter()
        .unwrap();

        assert_eq!(filter.created_from.unwrap().to_rfc3339(), "2024-03-01T00:00:00+00:00");
        assert_eq!(
            filter.created_to.unwrap().to_rfc3339(),
            "2024-03-31T23:59:59.999+00:00"
        );

        let filter = ListOrdersQuery {
            from: Some("2024-03-01T10:00:00Z".into()),
            ..Default::default()
        }
        .into_filter()
        .unwrap();
        assert_eq!(filter.created_from.unwrap().to_rfc3339(), "2024-03-01T10:00:00+00:00");

        let err = ListOrdersQuery {
            to: Some("last tuesday".into()),
            ..Default::default()
        }
        .into_filter()
        .unwrap_err();
        assert_eq!(err.kind(), "invalid_filter");
    }

    #[test]
    fn test_blank_query_values_are_ignored() {
        let filter = ListOrdersQuery {
            status: Some(" ".into()),
            customer_id: Some("".into()),
            limit: Some(10),
            ..Default::default()
        }
        .into_filter()
        .unwrap();

        assert_eq!(filter.status, None);
        assert_eq!(filter.customer_id, None);
        assert_eq!(filter.limit, 10);
    }
}
