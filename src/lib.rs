//! Axionik checkout core
//!
//! Conversational-commerce checkout backend: session filters, carts, an
//! inventory ledger with expiring reservations, an order state machine and
//! Stripe/Razorpay payment bindings over a key-value store.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod middleware_helpers;
pub mod models;
pub mod payments;
pub mod services;
pub mod store;
pub mod tracing;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers::{admin, carts, chat, checkout, health, orders, webhooks};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub config: config::AppConfig,
    pub store: Arc<dyn store::KeyValueStore>,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

/// Shopper-facing and provider-facing routes.
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/chat-checkout", get(chat::chat_checkout))
        .route("/shop", get(chat::shop))
        .route("/add-to-cart", post(carts::add_to_cart))
        .route("/cart", get(carts::get_cart))
        .route("/checkout", post(checkout::checkout))
        .route("/webhook/stripe", post(webhooks::stripe_webhook))
        .route("/webhook/razorpay", post(webhooks::razorpay_webhook))
        .route("/order/:order_id", get(orders::get_order))
        .route("/chat-track-order", get(orders::chat_track_order))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/order/:order_id/status", post(admin::set_delivery_status))
        .route("/order/:order_id/refund", post(admin::refund_order))
        .route("/orders", get(admin::list_orders))
        .route("/inventory/:product_id/restock", post(admin::restock))
}

/// Full application router with request-id, metrics and tracing layers.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .merge(checkout_routes())
        .nest("/admin", admin_routes())
        .layer(axum::middleware::from_fn(metrics::track_http_metrics))
        .layer(tracing::configure_http_tracing())
        // Outermost so the request id is visible to the trace span and error bodies
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}
