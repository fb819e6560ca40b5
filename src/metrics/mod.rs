//! Prometheus metrics for the checkout core, exposed in text format at `/metrics`.

use axum::{extract::Request, middleware::Next, response::Response};
use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, Encoder, Histogram, IntCounter, TextEncoder,
};
use std::time::Instant;
use tracing::trace;

lazy_static! {
    // HTTP metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounter = register_int_counter!(
        "http_requests_total",
        "Total number of HTTP requests"
    ).unwrap();

    pub static ref HTTP_REQUESTS_ERROR: IntCounter = register_int_counter!(
        "http_requests_error_total",
        "Total number of failed HTTP requests"
    ).unwrap();

    pub static ref HTTP_REQUEST_DURATION: Histogram = register_histogram!(
        "http_request_duration_seconds",
        "HTTP request latencies in seconds"
    ).unwrap();

    // Checkout metrics
    pub static ref CHAT_SESSIONS_CREATED: IntCounter = register_int_counter!(
        "chat_sessions_created_total",
        "Total number of conversational shopping sessions created"
    ).unwrap();

    pub static ref CHECKOUTS_STARTED: IntCounter = register_int_counter!(
        "checkouts_started_total",
        "Total number of checkout attempts"
    ).unwrap();

    pub static ref CHECKOUTS_FAILED: IntCounter = register_int_counter!(
        "checkouts_failed_total",
        "Total number of checkout attempts rolled back"
    ).unwrap();

    pub static ref ORDERS_PAID: IntCounter = register_int_counter!(
        "orders_paid_total",
        "Total number of orders moved to paid"
    ).unwrap();

    pub static ref ORDERS_CANCELLED: IntCounter = register_int_counter!(
        "orders_cancelled_total",
        "Total number of orders cancelled after payment failure"
    ).unwrap();

    pub static ref ORDERS_REFUNDED: IntCounter = register_int_counter!(
        "orders_refunded_total",
        "Total number of refunded orders"
    ).unwrap();

    // Inventory metrics
    pub static ref RESERVATIONS_CREATED: IntCounter = register_int_counter!(
        "inventory_reservations_created_total",
        "Total number of inventory reservations granted"
    ).unwrap();

    pub static ref RESERVATIONS_REJECTED: IntCounter = register_int_counter!(
        "inventory_reservations_rejected_total",
        "Total number of reservations rejected for insufficient stock"
    ).unwrap();

    pub static ref RESERVATIONS_RELEASED: IntCounter = register_int_counter!(
        "inventory_reservations_released_total",
        "Total number of reservations released"
    ).unwrap();

    pub static ref RESERVATIONS_EXPIRED: IntCounter = register_int_counter!(
        "inventory_reservations_expired_total",
        "Total number of reservations auto-released after their TTL"
    ).unwrap();

    pub static ref RESERVATIONS_COMMITTED: IntCounter = register_int_counter!(
        "inventory_reservations_committed_total",
        "Total number of reservations committed to stock"
    ).unwrap();

    pub static ref CAS_CONFLICTS: IntCounter = register_int_counter!(
        "store_cas_conflicts_total",
        "Total number of compare-and-swap retries"
    ).unwrap();

    // Webhook metrics
    pub static ref WEBHOOKS_RECEIVED: IntCounter = register_int_counter!(
        "payment_webhooks_received_total",
        "Total number of payment webhooks received"
    ).unwrap();

    pub static ref WEBHOOKS_REJECTED: IntCounter = register_int_counter!(
        "payment_webhooks_rejected_total",
        "Total number of payment webhooks rejected for bad signatures"
    ).unwrap();

    pub static ref WEBHOOKS_DUPLICATE: IntCounter = register_int_counter!(
        "payment_webhooks_duplicate_total",
        "Total number of replayed payment webhooks absorbed"
    ).unwrap();

    // Store metrics
    pub static ref STORE_OPERATIONS: IntCounter = register_int_counter!(
        "store_operations_total",
        "Total number of key-value store operations"
    ).unwrap();
}

/// Record HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, started: Instant) {
    HTTP_REQUESTS_TOTAL.inc();

    trace!(
        http.method = method,
        http.path = path,
        http.status = status,
        latency_secs = started.elapsed().as_secs_f64(),
        "recording HTTP request metrics"
    );

    if status >= 400 {
        HTTP_REQUESTS_ERROR.inc();
    }

    HTTP_REQUEST_DURATION.observe(started.elapsed().as_secs_f64());
}

/// Middleware recording request count, errors and latency.
pub async fn track_http_metrics(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;
    record_http_request(&method, &path, response.status().as_u16(), started);
    response
}

/// Gather all metrics and return as Prometheus text format
pub fn gather_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_metrics_are_exported() {
        ORDERS_PAID.inc();
        let text = gather_metrics().unwrap();
        assert!(text.contains("orders_paid_total"));
    }
}
