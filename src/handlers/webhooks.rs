use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use serde_json::json;
use tracing::info;

use crate::errors::ServiceError;
use crate::handlers::AppState;

async fn handle(
    state: &AppState,
    gateway: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = state
        .services
        .orders
        .process_webhook(gateway, body, headers)
        .await?;

    info!(gateway, outcome = outcome.label(), "Webhook acknowledged");
    Ok((
        StatusCode::OK,
        Json(json!({ "received": true, "outcome": outcome.label() })),
    ))
}

// POST /webhook/stripe
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    handle(&state, "stripe", &headers, &body).await
}

// POST /webhook/razorpay
pub async fn razorpay_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    handle(&state, "razorpay", &headers, &body).await
}
