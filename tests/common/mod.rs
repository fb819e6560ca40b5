#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{HeaderMap, Method, Request},
    Router,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

use axionik_checkout::{
    config::{AppConfig, RazorpayConfig},
    errors::ServiceError,
    events::{self, EventHandler, EventSender, LoggingEventHandler},
    handlers::AppServices,
    models::{Order, Product, SessionFilters},
    payments::{
        signature::hmac_sha256_hex, GatewayEvent, GatewayRegistry, PaymentGateway, PaymentIntent,
        RazorpayGateway,
    },
    store::{InMemoryStore, KeyValueStore, ManualClock},
    AppState,
};

pub const WEBHOOK_SECRET: &str = "rzp_test_webhook_secret";

/// Razorpay-named gateway that creates intents locally and verifies
/// callbacks with the real Razorpay signature scheme.
pub struct FakeGateway {
    verifier: RazorpayGateway,
    fail_next: AtomicBool,
    created: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        let verifier = RazorpayGateway::new(
            RazorpayConfig {
                key_id: Some("rzp_test_key".into()),
                key_secret: Some("rzp_test_secret".into()),
                webhook_secret: Some(WEBHOOK_SECRET.into()),
                ..RazorpayConfig::default()
            },
            Duration::from_secs(1),
        )
        .expect("razorpay verifier");
        Self {
            verifier,
            fail_next: AtomicBool::new(false),
            created: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_intent(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn intents_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn name(&self) -> &'static str {
        "razorpay"
    }

    async fn create_intent(&self, order: &Order) -> Result<PaymentIntent, ServiceError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ServiceError::GatewayError("provider unavailable".into()));
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PaymentIntent {
            gateway_ref: format!("order_fake_{}", n),
            client_payload: json!({ "amount": order.amount, "currency": order.currency }),
        })
    }

    fn verify_callback(
        &self,
        payload: &[u8],
        headers: &HeaderMap,
    ) -> Result<GatewayEvent, ServiceError> {
        self.verifier.verify_callback(payload, headers)
    }
}

pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub clock: ManualClock,
    pub gateway: Arc<FakeGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let cfg = AppConfig {
            reservation_ttl_secs: 300,
            ..AppConfig::default()
        };

        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
        let clock = ManualClock::default();
        let gateway = Arc::new(FakeGateway::new());
        let gateways = GatewayRegistry::new().register(gateway.clone());

        let (tx, rx) = mpsc::channel(1024);
        let handlers: Vec<Arc<dyn EventHandler>> = vec![Arc::new(LoggingEventHandler)];
        let event_task = tokio::spawn(events::process_events(rx, handlers));
        let event_sender = EventSender::new(tx);

        let services = AppServices::new(
            store.clone(),
            Arc::new(clock.clone()),
            gateways,
            event_sender.clone(),
            &cfg,
        );

        let state = AppState {
            config: cfg,
            store,
            event_sender,
            services,
        };

        Self {
            router: axionik_checkout::app_router(state.clone()),
            state,
            clock,
            gateway,
            _event_task: event_task,
        }
    }

    pub fn services(&self) -> &AppServices {
        &self.state.services
    }

    pub async fn seed_product(&self, id: &str, price: i64, quantity: u32) -> Product {
        let product = Product {
            id: id.to_string(),
            name: format!("Product {}", id),
            category: "tshirts".to_string(),
            color: Some("black".to_string()),
            price,
            sizes: ["M", "L"].iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            quantity,
        };
        self.services()
            .catalog
            .upsert(&product)
            .await
            .expect("seed product");
        product
    }

    pub async fn start_session(&self) -> String {
        self.services()
            .sessions
            .put(SessionFilters {
                intent: Some("tshirts".into()),
                ..Default::default()
            })
            .await
            .expect("session")
            .session_id
    }

    pub async fn available(&self, product_id: &str) -> u32 {
        self.services()
            .ledger
            .available(product_id)
            .await
            .expect("available")
    }

    pub async fn on_hand(&self, product_id: &str) -> u32 {
        self.services()
            .ledger
            .level(product_id)
            .await
            .expect("level")
            .on_hand
    }

    pub async fn order(&self, order_id: &str) -> Order {
        self.services()
            .orders
            .get_order(order_id)
            .await
            .expect("order")
    }

    /// Adds items to a fresh session's cart and checks out through the service layer.
    pub async fn checkout(&self, lines: &[(&str, i64)]) -> Result<String, ServiceError> {
        let session = self.start_session().await;
        for (product_id, qty) in lines {
            self.services()
                .carts
                .add_item(&session, product_id, *qty)
                .await?;
        }
        self.services()
            .orders
            .checkout(&session, "razorpay")
            .await
            .map(|receipt| receipt.order_id)
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Posts a Razorpay webhook signed with the test secret.
    pub async fn razorpay_webhook(&self, event_id: &str, body: &str) -> axum::response::Response {
        let signature = hmac_sha256_hex(WEBHOOK_SECRET, body.as_bytes()).expect("signature");
        self.razorpay_webhook_with_signature(event_id, body, &signature)
            .await
    }

    pub async fn razorpay_webhook_with_signature(
        &self,
        event_id: &str,
        body: &str,
        signature: &str,
    ) -> axum::response::Response {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/webhook/razorpay")
            .header("content-type", "application/json")
            .header("x-razorpay-signature", signature)
            .header("x-razorpay-event-id", event_id)
            .body(Body::from(body.to_string()))
            .expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during webhook request")
    }
}

/// Razorpay webhook body for `event` against `order_id`.
pub fn razorpay_event(event: &str, order_id: &str, payment_id: &str) -> String {
    json!({
        "event": event,
        "payload": {
            "payment": {
                "entity": {
                    "id": payment_id,
                    "notes": { "orderId": order_id }
                }
            }
        }
    })
    .to_string()
}

pub async fn read_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}
