use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::signature::verify_body_signature;
use super::{header_str, map_transport_error, GatewayEvent, GatewayEventKind, PaymentGateway, PaymentIntent};
use crate::config::RazorpayConfig;
use crate::errors::ServiceError;
use crate::models::Order;

pub const RAZORPAY_SIGNATURE_HEADER: &str = "x-razorpay-signature";
pub const RAZORPAY_EVENT_ID_HEADER: &str = "x-razorpay-event-id";

/// Razorpay Orders API adapter.
#[derive(Clone)]
pub struct RazorpayGateway {
    config: RazorpayConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RazorpayOrderResponse {
    id: String,
    amount: i64,
    currency: String,
}

impl RazorpayGateway {
    pub fn new(config: RazorpayConfig, timeout: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn name(&self) -> &'static str {
        "razorpay"
    }

    #[instrument(skip(self, order), fields(order_id = %order.order_id, amount = order.amount))]
    async fn create_intent(&self, order: &Order) -> Result<PaymentIntent, ServiceError> {
        let (key_id, key_secret) = match (&self.config.key_id, &self.config.key_secret) {
            (Some(id), Some(secret)) => (id, secret),
            _ => return Err(ServiceError::GatewayError("razorpay is not configured".into())),
        };

        let body = json!({
            "amount": order.amount,
            "currency": order.currency,
            "receipt": order.order_id,
            "notes": { "orderId": order.order_id },
        });

        let response = self
            .client
            .post(format!("{}/v1/orders", self.config.api_base))
            .basic_auth(key_id, Some(key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error("razorpay", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            warn!(%status, "Razorpay API error: {}", error_text);
            return Err(ServiceError::GatewayError(format!(
                "razorpay returned {}",
                status
            )));
        }

        let created: RazorpayOrderResponse = response.json().await.map_err(|e| {
            ServiceError::GatewayError(format!("Failed to parse Razorpay response: {}", e))
        })?;

        info!(razorpay_order_id = %created.id, "Razorpay order created");
        Ok(PaymentIntent {
            client_payload: json!({
                "gateway": "razorpay",
                "razorpayOrderId": created.id,
                "keyId": key_id,
                "amount": created.amount,
                "currency": created.currency,
            }),
            gateway_ref: created.id,
        })
    }

    fn verify_callback(
        &self,
        payload: &[u8],
        headers: &HeaderMap,
    ) -> Result<GatewayEvent, ServiceError> {
        let secret = self.config.webhook_secret.as_deref().ok_or_else(|| {
            ServiceError::InvalidSignature("razorpay webhook secret is not configured".into())
        })?;
        let signature = header_str(headers, RAZORPAY_SIGNATURE_HEADER)
            .ok_or_else(|| ServiceError::InvalidSignature("missing X-Razorpay-Signature".into()))?;

        verify_body_signature(secret, payload, signature)?;

        let mut event = parse_event(payload)?;
        if let Some(id) = header_str(headers, RAZORPAY_EVENT_ID_HEADER) {
            event.event_id = Some(id.to_string());
        }
        Ok(event)
    }
}

fn parse_event(payload: &[u8]) -> Result<GatewayEvent, ServiceError> {
    let event: Value = serde_json::from_slice(payload)
        .map_err(|e| ServiceError::InvalidInput(format!("invalid json: {}", e)))?;

    let event_type = event
        .get("event")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let kind = match event_type.as_str() {
        "order.paid" | "payment.captured" => GatewayEventKind::Succeeded,
        // `payment.failed` is one declined attempt; the order stays payable and
        // an abandoned one is reclaimed by reservation expiry.
        _ => GatewayEventKind::Ignored,
    };

    let payment = event.pointer("/payload/payment/entity");
    let order = event.pointer("/payload/order/entity");
    let field = |entity: Option<&Value>, path: &str| {
        entity
            .and_then(|e| e.pointer(path))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let order_id = field(order, "/notes/orderId")
        .or_else(|| field(payment, "/notes/orderId"))
        .or_else(|| field(order, "/receipt"));
    let gateway_ref = field(order, "/id").or_else(|| field(payment, "/order_id"));

    // Deliveries without the event-id header fall back to event name plus payment id.
    let event_id = field(payment, "/id")
        .map(|payment_id| format!("{}:{}", event_type, payment_id))
        .or_else(|| gateway_ref.as_ref().map(|r| format!("{}:{}", event_type, r)));

    Ok(GatewayEvent {
        event_id,
        event_type,
        kind,
        order_id,
        gateway_ref,
    })
}
