//! Payment Gateway Adapter
//!
//! Each provider implements [`PaymentGateway`]: create a provider-side intent
//! for an order, and turn a signed webhook delivery into a [`GatewayEvent`].
//! Signature verification happens before any payload field is trusted.

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::ServiceError;
use crate::models::Order;

pub mod razorpay;
pub mod signature;
pub mod stripe;

pub use self::razorpay::RazorpayGateway;
pub use self::stripe::StripeGateway;

/// Provider-side handle returned by intent creation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    /// Provider id the order is indexed under (Stripe session id, Razorpay order id)
    pub gateway_ref: String,
    /// Whatever the shopper's client needs to complete payment
    pub client_payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEventKind {
    Succeeded,
    Failed,
    /// Verified but irrelevant to order state
    Ignored,
}

/// A verified webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEvent {
    pub event_id: Option<String>,
    pub event_type: String,
    pub kind: GatewayEventKind,
    pub order_id: Option<String>,
    pub gateway_ref: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create_intent(&self, order: &Order) -> Result<PaymentIntent, ServiceError>;

    /// Verifies the delivery's signature, then parses it. Fails with
    /// `InvalidSignature` before looking at the payload.
    fn verify_callback(
        &self,
        payload: &[u8],
        headers: &HeaderMap,
    ) -> Result<GatewayEvent, ServiceError>;
}

/// Gateways by name (`"stripe"`, `"razorpay"`).
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<String, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.name().to_string(), gateway);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn PaymentGateway>, ServiceError> {
        self.gateways
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| ServiceError::InvalidInput(format!("unsupported gateway: {}", name)))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.gateways.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub(crate) fn map_transport_error(gateway: &str, err: reqwest::Error) -> ServiceError {
    if err.is_timeout() {
        ServiceError::Timeout(format!("{} request", gateway))
    } else {
        ServiceError::GatewayError(format!("{} request failed: {}", gateway, err))
    }
}

/// Registers every gateway whose credentials are present in `config`.
pub fn registry_from_config(
    config: &crate::config::AppConfig,
    clock: Arc<dyn crate::store::Clock>,
) -> Result<GatewayRegistry, ServiceError> {
    let mut registry = GatewayRegistry::new();

    if config.stripe.secret_key.is_some() && config.stripe.webhook_secret.is_some() {
        registry = registry.register(Arc::new(StripeGateway::new(
            config.stripe.clone(),
            config.gateway_timeout(),
            clock,
            config.webhook_tolerance_secs,
        )?));
    }

    let rzp = &config.razorpay;
    if rzp.key_id.is_some() && rzp.key_secret.is_some() && rzp.webhook_secret.is_some() {
        registry = registry.register(Arc::new(RazorpayGateway::new(
            rzp.clone(),
            config.gateway_timeout(),
        )?));
    }

    if registry.gateways.is_empty() {
        tracing::warn!("No payment gateway credentials configured; checkout is disabled");
    } else {
        tracing::info!(gateways = ?registry.names(), "Payment gateways enabled");
    }
    Ok(registry)
}
