use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use validator::Validate;

use crate::errors::{ApiError, ServiceError};
use crate::handlers::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[validate(length(min = 1))]
    pub session: String,
    #[validate(length(min = 1))]
    pub gateway: String,
}

// POST /checkout
pub async fn checkout(
    State(state): State<AppState>,
    Json(payload): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    payload.validate().map_err(ServiceError::from)?;

    state.services.sessions.require(&payload.session).await?;
    let receipt = state
        .services
        .orders
        .checkout(&payload.session, &payload.gateway)
        .await?;

    Ok((StatusCode::CREATED, Json(receipt)))
}
