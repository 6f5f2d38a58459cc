//! Order route handlers.
//!
//! Ownership checks live in [`crate::services::OrderQueryService`]; these
//! handlers only pass the caller identity through.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::error::Result;
use crate::middleware::OptionalAuth;
use crate::models::{OrderLine, OrderSummary};
use crate::services::{CreatedOrder, OrderRequest};
use crate::state::AppState;

/// All orders with their owners.
///
/// GET /api/orders
pub async fn index(
    State(state): State<AppState>,
    OptionalAuth(caller): OptionalAuth,
) -> Result<Json<Vec<OrderSummary>>> {
    let orders = state.orders().list_all(caller.as_ref()).await?;
    Ok(Json(orders))
}

/// Orders belonging to one user, visible to that user only.
///
/// GET /api/orders/{username}
pub async fn for_user(
    State(state): State<AppState>,
    OptionalAuth(caller): OptionalAuth,
    Path(username): Path<String>,
) -> Result<Json<Vec<OrderSummary>>> {
    let orders = state
        .orders()
        .list_for_user(caller.as_ref(), &username)
        .await?;
    Ok(Json(orders))
}

/// Lines of one order, visible to its owner only.
///
/// GET /api/orders/orderlines/{orderid}
pub async fn lines(
    State(state): State<AppState>,
    OptionalAuth(caller): OptionalAuth,
    Path(order_id): Path<String>,
) -> Result<Json<Vec<OrderLine>>> {
    let lines = state.orders().list_lines(caller.as_ref(), &order_id).await?;
    Ok(Json(lines))
}

/// Create an order with its lines.
///
/// POST /api/orders
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<OrderRequest>,
) -> Result<(StatusCode, Json<CreatedOrder>)> {
    let created = state.orders().create_order(request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}
