use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use serde_json::json;
use std::time::Instant;

use crate::handlers::AppState;

/// Component health status
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub message: String,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub version: String,
    pub timestamp: String,
    pub store: ComponentHealth,
}

/// Basic liveness probe
pub async fn root() -> impl IntoResponse {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "status": "up",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness: pings the store backend.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();
    let ping = state.store.ping().await;
    let latency_ms = started.elapsed().as_millis() as u64;

    let store = ComponentHealth {
        status: if ping.is_ok() {
            ComponentStatus::Up
        } else {
            ComponentStatus::Down
        },
        message: ping.map_or_else(
            |e| format!("Store unreachable: {}", e),
            |_| "Store reachable".to_string(),
        ),
        latency_ms,
    };

    let status_code = match store.status {
        ComponentStatus::Up => StatusCode::OK,
        ComponentStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
    };

    let response = HealthResponse {
        status: store.status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        store,
    };

    (status_code, Json(response))
}

pub async fn metrics() -> impl IntoResponse {
    match crate::metrics::gather_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            String::from("metrics error"),
        ),
    }
}
