use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::signature::verify_timestamped_signature;
use super::{header_str, map_transport_error, GatewayEvent, GatewayEventKind, PaymentGateway, PaymentIntent};
use crate::config::StripeConfig;
use crate::errors::ServiceError;
use crate::models::Order;
use crate::store::Clock;

pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

/// Stripe Checkout Sessions adapter.
#[derive(Clone)]
pub struct StripeGateway {
    config: StripeConfig,
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
    tolerance_secs: u64,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
}

impl StripeGateway {
    pub fn new(
        config: StripeConfig,
        timeout: Duration,
        clock: Arc<dyn Clock>,
        tolerance_secs: u64,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client: {}", e)))?;
        Ok(Self {
            config,
            client,
            clock,
            tolerance_secs,
        })
    }

    fn session_form(&self, order: &Order) -> Vec<(String, String)> {
        let currency = order.currency.to_ascii_lowercase();
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            (
                "success_url".to_string(),
                self.config.success_url.replace("{ORDER_ID}", &order.order_id),
            ),
            (
                "cancel_url".to_string(),
                self.config.cancel_url.replace("{ORDER_ID}", &order.order_id),
            ),
            ("client_reference_id".to_string(), order.order_id.clone()),
            ("metadata[orderId]".to_string(), order.order_id.clone()),
            (
                "payment_intent_data[metadata][orderId]".to_string(),
                order.order_id.clone(),
            ),
        ];

        for (i, item) in order.items.iter().enumerate() {
            let prefix = format!("line_items[{}]", i);
            form.push((format!("{}[price_data][currency]", prefix), currency.clone()));
            form.push((
                format!("{}[price_data][product_data][name]", prefix),
                item.name.clone(),
            ));
            form.push((
                format!("{}[price_data][unit_amount]", prefix),
                item.unit_price.to_string(),
            ));
            form.push((format!("{}[quantity]", prefix), item.qty.to_string()));
        }
        form
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn name(&self) -> &'static str {
        "stripe"
    }

    #[instrument(skip(self, order), fields(order_id = %order.order_id, amount = order.amount))]
    async fn create_intent(&self, order: &Order) -> Result<PaymentIntent, ServiceError> {
        let secret_key = self
            .config
            .secret_key
            .as_deref()
            .ok_or_else(|| ServiceError::GatewayError("stripe is not configured".into()))?;

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.config.api_base))
            .basic_auth(secret_key, Some(""))
            .form(&self.session_form(order))
            .send()
            .await
            .map_err(|e| map_transport_error("stripe", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            warn!(%status, "Stripe API error: {}", error_text);
            return Err(ServiceError::GatewayError(format!(
                "stripe returned {}",
                status
            )));
        }

        let session: CheckoutSessionResponse = response.json().await.map_err(|e| {
            ServiceError::GatewayError(format!("Failed to parse Stripe response: {}", e))
        })?;

        info!(session_id = %session.id, "Stripe checkout session created");
        Ok(PaymentIntent {
            client_payload: json!({
                "gateway": "stripe",
                "sessionId": session.id,
                "url": session.url,
            }),
            gateway_ref: session.id,
        })
    }

    fn verify_callback(
        &self,
        payload: &[u8],
        headers: &HeaderMap,
    ) -> Result<GatewayEvent, ServiceError> {
        let secret = self.config.webhook_secret.as_deref().ok_or_else(|| {
            ServiceError::InvalidSignature("stripe webhook secret is not configured".into())
        })?;
        let header = header_str(headers, STRIPE_SIGNATURE_HEADER)
            .ok_or_else(|| ServiceError::InvalidSignature("missing Stripe-Signature".into()))?;

        verify_timestamped_signature(
            secret,
            header,
            payload,
            self.clock.now().timestamp(),
            self.tolerance_secs,
        )?;

        parse_event(payload)
    }
}

fn parse_event(payload: &[u8]) -> Result<GatewayEvent, ServiceError> {
    let event: Value = serde_json::from_slice(payload)
        .map_err(|e| ServiceError::InvalidInput(format!("invalid json: {}", e)))?;

    let event_type = event
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let object = event.pointer("/data/object").cloned().unwrap_or(Value::Null);

    let kind = match event_type.as_str() {
        "checkout.session.completed" => {
            // Delayed-notification methods complete unpaid and settle later.
            match object.get("payment_status").and_then(Value::as_str) {
                Some("unpaid") => GatewayEventKind::Ignored,
                _ => GatewayEventKind::Succeeded,
            }
        }
        "checkout.session.async_payment_succeeded" => GatewayEventKind::Succeeded,
        // A declined attempt leaves the session open for a retry; only these end it.
        "checkout.session.expired" | "checkout.session.async_payment_failed" => {
            GatewayEventKind::Failed
        }
        _ => GatewayEventKind::Ignored,
    };

    let order_id = object
        .pointer("/metadata/orderId")
        .and_then(Value::as_str)
        .or_else(|| object.get("client_reference_id").and_then(Value::as_str))
        .map(str::to_string);

    let gateway_ref = if event_type.starts_with("checkout.session.") {
        object.get("id").and_then(Value::as_str).map(str::to_string)
    } else {
        None
    };

    Ok(GatewayEvent {
        event_id: event.get("id").and_then(Value::as_str).map(str::to_string),
        event_type,
        kind,
        order_id,
        gateway_ref,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::signature::hmac_sha256_hex;
    use crate::store::ManualClock;
    use axum::http::HeaderValue;

    fn gateway(clock: ManualClock) -> StripeGateway {
        let config = StripeConfig {
            secret_key: Some("sk_test".into()),
            webhook_secret: Some("whsec_test".into()),
            ..StripeConfig::default()
        };
        StripeGateway::new(config, Duration::from_secs(5), Arc::new(clock), 300).unwrap()
    }

    fn signed_headers(body: &str, ts: i64) -> HeaderMap {
        let sig = hmac_sha256_hex("whsec_test", format!("{}.{}", ts, body).as_bytes()).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            STRIPE_SIGNATURE_HEADER,
            HeaderValue::from_str(&format!("t={},v1={}", ts, sig)).unwrap(),
        );
        headers
    }

    #[test]
    fn completed_session_is_a_success_for_its_order() {
        let clock = ManualClock::default();
        let ts = clock.now().timestamp();
        let body = r#"{"id":"evt_1","type":"checkout.session.completed","data":{"object":{"id":"cs_1","payment_status":"paid","metadata":{"orderId":"ORD-1"}}}}"#;

        let event = gateway(clock)
            .verify_callback(body.as_bytes(), &signed_headers(body, ts))
            .unwrap();
        assert_eq!(event.kind, GatewayEventKind::Succeeded);
        assert_eq!(event.event_id.as_deref(), Some("evt_1"));
        assert_eq!(event.order_id.as_deref(), Some("ORD-1"));
        assert_eq!(event.gateway_ref.as_deref(), Some("cs_1"));
    }

    #[test]
    fn expired_session_fails_the_order() {
        let clock = ManualClock::default();
        let ts = clock.now().timestamp();
        let body = r#"{"id":"evt_2","type":"checkout.session.expired","data":{"object":{"id":"cs_2","client_reference_id":"ORD-2"}}}"#;

        let event = gateway(clock)
            .verify_callback(body.as_bytes(), &signed_headers(body, ts))
            .unwrap();
        assert_eq!(event.kind, GatewayEventKind::Failed);
        assert_eq!(event.order_id.as_deref(), Some("ORD-2"));
    }

    #[test]
    fn declined_attempt_does_not_end_the_session() {
        let clock = ManualClock::default();
        let ts = clock.now().timestamp();
        let body = r#"{"id":"evt_4","type":"payment_intent.payment_failed","data":{"object":{"id":"pi_4","metadata":{"orderId":"ORD-4"}}}}"#;

        let event = gateway(clock)
            .verify_callback(body.as_bytes(), &signed_headers(body, ts))
            .unwrap();
        assert_eq!(event.kind, GatewayEventKind::Ignored);
    }

    #[test]
    fn tampered_body_is_rejected() {
        let clock = ManualClock::default();
        let ts = clock.now().timestamp();
        let body = r#"{"id":"evt_3","type":"checkout.session.completed"}"#;
        let headers = signed_headers(body, ts);

        let err = gateway(clock)
            .verify_callback(br#"{"id":"evt_3","type":"checkout.session.expired"}"#, &headers)
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidSignature(_)));
    }

    #[test]
    fn session_form_carries_order_metadata_and_line_items() {
        let clock = ManualClock::default();
        let order = Order::new(
            "ORD-9".into(),
            "s1".into(),
            vec![crate::models::OrderItem {
                product_id: "P1".into(),
                qty: 2,
                unit_price: 129_900,
                name: "Tee".into(),
            }],
            "INR".into(),
            vec![],
            clock.now(),
        );
        let form = gateway(clock).session_form(&order);
        let get = |k: &str| form.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());

        assert_eq!(get("metadata[orderId]"), Some("ORD-9"));
        assert_eq!(get("line_items[0][price_data][unit_amount]"), Some("129900"));
        assert_eq!(get("line_items[0][price_data][currency]"), Some("inr"));
        assert_eq!(get("line_items[0][quantity]"), Some("2"));
    }
}
