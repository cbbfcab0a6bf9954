use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::models::{
    CreateOrderRequest, ExecuteRequest, HistoryQuery, ListOrdersQuery, MyOrdersQuery, PlacementResponse,
};
use crate::rate_limit::EndpointClass;
use crate::state::AppState;
use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
};
use chrono::Utc;
use market::MarketStats;
use types::ids::OrderId;
use types::order::Order;
use types::resource::ResourceType;
use types::transaction::Transaction;

pub async fn create_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PlacementResponse>), AppError> {
    state.rate_limiter.check(user.user_id, EndpointClass::Placement)?;
    let Json(payload) = payload?;

    let now = Utc::now();
    let request = payload.into_new_order(user.user_id, now)?;
    let placement = state.run(move |market| market.place_order(request, now)).await?;

    Ok((
        StatusCode::CREATED,
        Json(PlacementResponse {
            order: placement.order,
            fills: placement.fills,
        }),
    ))
}

pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    query: Result<Query<ListOrdersQuery>, QueryRejection>,
) -> Result<Json<Vec<Order>>, AppError> {
    state.rate_limiter.check(user.user_id, EndpointClass::Query)?;
    let Query(query) = query?;

    let orders = state
        .market
        .list_active(query.resource_type, query.side, query.limit, query.offset, Utc::now());
    Ok(Json(orders))
}

pub async fn get_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Order>, AppError> {
    state.rate_limiter.check(user.user_id, EndpointClass::Query)?;
    Ok(Json(state.market.get_order(order_id)?))
}

pub async fn execute_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(order_id): Path<OrderId>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<Json<Transaction>, AppError> {
    state.rate_limiter.check(user.user_id, EndpointClass::Execute)?;
    let Json(payload) = payload?;

    let user_id = user.user_id;
    let transaction = state
        .run(move |market| market.execute(order_id, payload.quantity, user_id, payload.city_id, Utc::now()))
        .await?;
    Ok(Json(transaction))
}

/// Cancel an active order
///
/// Cancelling an order that is already closed changes nothing in the
/// market, but the caller gets 409 `INVALID_STATE` with the order's
/// current status rather than a 200, so a client never mistakes a
/// completed order for a cancelled one.
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Order>, AppError> {
    state.rate_limiter.check(user.user_id, EndpointClass::Cancel)?;

    let user_id = user.user_id;
    let outcome = state
        .run(move |market| market.cancel_order(order_id, user_id, Utc::now()))
        .await?;
    Ok(Json(outcome.into_cancelled()?))
}

pub async fn my_orders(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    query: Result<Query<MyOrdersQuery>, QueryRejection>,
) -> Result<Json<Vec<Order>>, AppError> {
    state.rate_limiter.check(user.user_id, EndpointClass::Query)?;
    let Query(query) = query?;
    Ok(Json(state.market.orders_of(user.user_id, query.status, query.limit)))
}

pub async fn my_transactions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<Transaction>>, AppError> {
    state.rate_limiter.check(user.user_id, EndpointClass::Query)?;
    let Query(query) = query?;
    Ok(Json(state.market.transactions_of(user.user_id, query.limit)))
}

pub async fn stats(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(resource_type): Path<ResourceType>,
) -> Result<Json<MarketStats>, AppError> {
    state.rate_limiter.check(user.user_id, EndpointClass::Query)?;
    Ok(Json(state.market.stats(resource_type, Utc::now())))
}
