use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use serde_json::json;

use crate::errors::ServiceError;
use crate::handlers::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackOrderQuery {
    pub order_id: String,
}

// GET /order/:orderId
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.get_order(&order_id).await?;
    Ok(Json(order))
}

// GET /chat-track-order?orderId=
pub async fn chat_track_order(
    State(state): State<AppState>,
    Query(query): Query<TrackOrderQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let message = state
        .services
        .orders
        .tracking_message(query.order_id.trim())
        .await?;
    Ok(Json(json!({ "orderId": query.order_id, "message": message })))
}
