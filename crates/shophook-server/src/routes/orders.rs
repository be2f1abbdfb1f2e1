//! Order lookup.

use axum::{
    Json,
    extract::{Path, State},
};
use shophook_core::models::OrderResponse;

use crate::error::ApiError;
use crate::state::AppState;

/// Get an order by platform id.
///
/// GET /api/orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<OrderResponse>, ApiError> {
    match state.orders.get(id).await? {
        Some(order) => Ok(Json(OrderResponse::from(order))),
        None => Err(ApiError::not_found("Order not found")),
    }
}
