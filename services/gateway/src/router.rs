use crate::handlers::{market, resources, ws};
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let market_routes = Router::new()
        .route("/orders", post(market::create_order).get(market::list_orders))
        .route("/orders/{id}", get(market::get_order).delete(market::cancel_order))
        .route("/orders/{id}/execute", post(market::execute_order))
        .route("/my/orders", get(market::my_orders))
        .route("/my/transactions", get(market::my_transactions))
        .route("/stats/{resource_type}", get(market::stats))
        .route("/ws", get(ws::ws_handler));

    Router::new()
        .nest("/market", market_routes)
        .route("/cities/{city_id}/resources", get(resources::city_resources))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::issue_token;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, StatusCode, header};
    use ::market::{InMemoryCityDirectory, Market, MarketConfig};
    use rust_decimal::Decimal;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;
    use types::commit::NullSink;
    use types::ids::{CityId, UserId};
    use types::ledger::LedgerKey;
    use types::resource::ResourceType;

    const SECRET: &str = "test-secret";

    fn app() -> (Router, Arc<Market>) {
        let directory = Arc::new(InMemoryCityDirectory::new());
        directory.assign(CityId(10), UserId(1));
        directory.assign(CityId(20), UserId(2));
        let market = Arc::new(Market::new(
            MarketConfig::default(),
            directory,
            Arc::new(NullSink),
        ));
        market
            .ledger()
            .credit(LedgerKey::city(CityId(10), ResourceType::Metal), Decimal::from(100))
            .unwrap();
        market
            .ledger()
            .credit(LedgerKey::city(CityId(20), ResourceType::Gold), Decimal::from(1000))
            .unwrap();
        (create_router(AppState::new(market.clone(), SECRET)), market)
    }

    async fn call(app: &Router, method: Method, uri: &str, user: Option<u64>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", issue_token(SECRET, UserId(user))));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    fn sell_body(quantity: u64, price: &str) -> Value {
        json!({
            "cityId": 10,
            "orderType": "sell",
            "resourceType": "metal",
            "quantity": quantity,
            "pricePerUnit": price,
        })
    }

    #[tokio::test]
    async fn test_requires_bearer_token() {
        let (app, _) = app();
        let (status, body) = call(&app, Method::GET, "/market/my/orders", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_order_lifecycle() {
        let (app, _) = app();
        let (status, order) = call(&app, Method::POST, "/market/orders", Some(1), Some(sell_body(100, "5"))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(order["status"], "active");
        assert_eq!(order["ownerId"], 1);
        let id = order["id"].as_str().unwrap().to_string();

        let (status, listed) = call(&app, Method::GET, "/market/orders?resourceType=metal", Some(2), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let uri = format!("/market/orders/{}/execute", id);
        let (status, tx) = call(&app, Method::POST, &uri, Some(2), Some(json!({"quantity": 60, "cityId": 20}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(tx["quantity"], 60);
        assert_eq!(tx["totalPrice"], "300.00");
        assert_eq!(tx["taxAmount"], "15.00");

        let (status, body) = call(&app, Method::POST, &uri, Some(1), Some(json!({"quantity": 1, "cityId": 10}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "SELF_TRADE");

        let (status, cancelled) = call(&app, Method::DELETE, &format!("/market/orders/{}", id), Some(1), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cancelled["status"], "cancelled");
        assert_eq!(cancelled["remainingQuantity"], 40);

        let (status, body) = call(&app, Method::DELETE, &format!("/market/orders/{}", id), Some(1), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "INVALID_STATE");

        let (status, body) = call(&app, Method::POST, &uri, Some(2), Some(json!({"quantity": 1, "cityId": 20}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "ORDER_UNAVAILABLE");

        let (_, history) = call(&app, Method::GET, "/market/my/transactions", Some(1), None).await;
        assert_eq!(history.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let (app, _) = app();
        let underfunded = json!({
            "cityId": 20,
            "orderType": "buy",
            "resourceType": "fuel",
            "quantity": 500,
            "pricePerUnit": "3",
        });
        let (status, body) = call(&app, Method::POST, "/market/orders", Some(2), Some(underfunded)).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["error"], "INSUFFICIENT_FUNDS");

        let (status, body) = call(&app, Method::POST, "/market/orders", Some(2), Some(sell_body(1, "1"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "CITY_NOT_OWNED");

        let (status, body) = call(&app, Method::POST, "/market/orders", Some(1), Some(sell_body(1, "0"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "VALIDATION_ERROR");

        let (status, body) = call(&app, Method::POST, "/market/orders", Some(1), Some(json!({"cityId": 10}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "VALIDATION_ERROR");

        let missing = types::ids::OrderId::new();
        let (status, body) = call(&app, Method::GET, &format!("/market/orders/{}", missing), Some(1), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "ORDER_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_city_resources_owner_only() {
        let (app, _) = app();
        let (status, body) = call(&app, Method::GET, "/cities/10/resources", Some(1), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["resources"][0]["resourceType"], "metal");
        assert_eq!(body["resources"][0]["available"], "100");

        let (status, body) = call(&app, Method::GET, "/cities/10/resources", Some(2), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "CITY_NOT_OWNED");
    }

    #[tokio::test]
    async fn test_cancel_of_filled_order_changes_nothing() {
        let (app, market) = app();
        let (_, order) = call(&app, Method::POST, "/market/orders", Some(1), Some(sell_body(10, "5"))).await;
        let id = order["id"].as_str().unwrap().to_string();
        let uri = format!("/market/orders/{}/execute", id);
        let (status, _) = call(&app, Method::POST, &uri, Some(2), Some(json!({"quantity": 10, "cityId": 20}))).await;
        assert_eq!(status, StatusCode::OK);
        let before = market.image();

        let (status, body) = call(&app, Method::DELETE, &format!("/market/orders/{}", id), Some(1), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "INVALID_STATE");
        assert!(body["message"].as_str().unwrap().contains("completed"));

        let (_, order) = call(&app, Method::GET, &format!("/market/orders/{}", id), Some(1), None).await;
        assert_eq!(order["status"], "completed");
        assert_eq!(market.image(), before);
    }

    #[tokio::test]
    async fn test_stats_reflect_book() {
        let (app, market) = app();
        call(&app, Method::POST, "/market/orders", Some(1), Some(sell_body(10, "4.50"))).await;

        let (status, stats) = call(&app, Method::GET, "/market/stats/metal", Some(2), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["bestAsk"], "4.50");
        assert_eq!(stats["sell"]["orderCount"], 1);
        assert_eq!(market.image().orders.len(), 1);
    }
}
