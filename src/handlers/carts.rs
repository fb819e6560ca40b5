use axum::{
    extract::{Query, State},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::{ApiError, ServiceError};
use crate::handlers::chat::SessionQuery;
use crate::handlers::AppState;
use crate::models::Cart;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartRequest {
    #[validate(length(min = 1))]
    pub session: String,
    #[validate(length(min = 1))]
    pub product_id: String,
    #[serde(default = "default_qty")]
    pub qty: i64,
}

fn default_qty() -> i64 {
    1
}

#[derive(Debug, Serialize)]
pub struct CartResponse {
    pub success: bool,
    pub cart: Cart,
}

// POST /add-to-cart
pub async fn add_to_cart(
    State(state): State<AppState>,
    Json(payload): Json<AddToCartRequest>,
) -> Result<impl IntoResponse, ApiError> {
    payload.validate().map_err(ServiceError::from)?;
    if payload.qty <= 0 {
        return Err(ServiceError::InvalidQuantity(payload.qty).into());
    }

    let services = &state.services;
    services.sessions.require(&payload.session).await?;
    services.catalog.require(&payload.product_id).await?;

    let cart = services
        .carts
        .add_item(&payload.session, &payload.product_id, payload.qty)
        .await?;

    Ok(Json(CartResponse {
        success: true,
        cart,
    }))
}

// GET /cart?session=
pub async fn get_cart(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state.services.carts.get_cart(&query.session).await?;
    Ok(Json(cart))
}
