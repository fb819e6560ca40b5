use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use tracing::info;

use crate::errors::{ApiError, ServiceError};
use crate::handlers::AppState;
use crate::models::{DeliveryStatus, OrderStatus};

#[derive(Debug, Deserialize)]
pub struct DeliveryStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RestockRequest {
    pub quantity: i64,
}

// POST /admin/order/:orderId/status
pub async fn set_delivery_status(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Json(payload): Json<DeliveryStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let status = DeliveryStatus::from_str(payload.status.trim().to_ascii_lowercase().as_str())
        .map_err(|_| {
            ApiError::bad_request(format!("Unknown delivery status: {}", payload.status))
        })?;

    let order = state
        .services
        .orders
        .set_delivery_status(&order_id, status)
        .await?;
    Ok(Json(json!({ "success": true, "order": order })))
}

// POST /admin/order/:orderId/refund
pub async fn refund_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.services.orders.refund(&order_id).await?;
    Ok(Json(json!({ "success": true, "order": order })))
}

// GET /admin/orders?status=
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") => Some(OrderStatus::Paid),
        Some("all") => None,
        Some(raw) => Some(
            OrderStatus::from_str(&raw.to_ascii_lowercase())
                .map_err(|_| ApiError::bad_request(format!("Unknown order status: {}", raw)))?,
        ),
    };

    let orders = state.services.orders.list_orders(status).await?;
    Ok(Json(json!({ "count": orders.len(), "orders": orders })))
}

// POST /admin/inventory/:productId/restock
pub async fn restock(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    Json(payload): Json<RestockRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let quantity = u32::try_from(payload.quantity)
        .ok()
        .filter(|q| *q > 0)
        .ok_or(ServiceError::InvalidQuantity(payload.quantity))?;

    state.services.catalog.require(&product_id).await?;
    let level = state.services.ledger.restock(&product_id, quantity).await?;
    info!(product_id = %product_id, quantity, on_hand = level.on_hand, "Manual restock");

    Ok(Json(json!({
        "success": true,
        "productId": product_id,
        "stock": level,
    })))
}
