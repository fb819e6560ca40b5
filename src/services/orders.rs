//! Order State Machine and the checkout algorithm.
//!
//! Payment axis: `created -> payment_pending -> paid | cancelled`, `paid -> refunded`.
//! Delivery axis (paid orders only): `processing -> shipped -> delivered`.
//!
//! Every status change is a compare-and-swap on `order:{id}`. Only the caller
//! whose swap lands performs the side effect (commit or release of the order's
//! reservations), so concurrent duplicate webhooks cannot double-apply.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics;
use crate::models::{Cart, DeliveryStatus, Order, OrderItem, OrderStatus, ReservationToken};
use crate::payments::{GatewayEvent, GatewayEventKind, GatewayRegistry, PaymentGateway};
use crate::services::cart::CartStore;
use crate::services::catalog::CatalogService;
use crate::services::inventory::InventoryLedger;
use crate::store::{get_json, get_versioned, Clock, KeyValueStore};

const MAX_CAS_ATTEMPTS: usize = 32;
const ORDER_KEY_PREFIX: &str = "order:";
const GATEWAY_INDEX_PREFIX: &str = "order:gateway:";

fn order_key(order_id: &str) -> String {
    format!("{}{}", ORDER_KEY_PREFIX, order_id)
}

fn gateway_index_key(gateway: &str, gateway_ref: &str) -> String {
    format!("{}{}:{}", GATEWAY_INDEX_PREFIX, gateway, gateway_ref)
}

fn webhook_event_key(gateway: &str, event_id: &str) -> String {
    format!("webhook:event:{}:{}", gateway, event_id)
}

/// Result of a successful checkout.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutReceipt {
    pub gateway: String,
    pub order_id: String,
    pub gateway_ref: String,
    pub amount: i64,
    pub currency: String,
    pub client_payload: serde_json::Value,
}

/// How a verified webhook delivery was absorbed. Every variant is acknowledged
/// to the provider with a success response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied {
        order_id: String,
        status: OrderStatus,
    },
    Duplicate,
    Ignored(&'static str),
}

impl WebhookOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            WebhookOutcome::Applied { .. } => "applied",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Ignored(_) => "ignored",
        }
    }
}

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    carts: CartStore,
    catalog: CatalogService,
    ledger: InventoryLedger,
    gateways: GatewayRegistry,
    event_sender: EventSender,
    currency: String,
    gateway_timeout: Duration,
    webhook_dedupe_ttl: Duration,
}

#[derive(Clone)]
pub struct OrderServiceSettings {
    pub currency: String,
    pub gateway_timeout: Duration,
    pub webhook_dedupe_ttl: Duration,
}

impl OrderService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        carts: CartStore,
        catalog: CatalogService,
        ledger: InventoryLedger,
        gateways: GatewayRegistry,
        event_sender: EventSender,
        settings: OrderServiceSettings,
    ) -> Self {
        Self {
            store,
            clock,
            carts,
            catalog,
            ledger,
            gateways,
            event_sender,
            currency: settings.currency,
            gateway_timeout: settings.gateway_timeout,
            webhook_dedupe_ttl: settings.webhook_dedupe_ttl,
        }
    }

    /// Reserves every cart line, creates the order and hands it to the gateway.
    ///
    /// Any failure after the first reservation releases everything acquired in
    /// this attempt; no partial order survives.
    #[instrument(skip(self))]
    pub async fn checkout(
        &self,
        session_id: &str,
        gateway_name: &str,
    ) -> Result<CheckoutReceipt, ServiceError> {
        let gateway = self.gateways.get(gateway_name)?;

        let cart = self.carts.get_cart(session_id).await?;
        if cart.is_empty() {
            return Err(ServiceError::CartEmpty);
        }

        metrics::CHECKOUTS_STARTED.inc();
        let result = self.place_order(session_id, &cart, gateway).await;
        if result.is_err() {
            metrics::CHECKOUTS_FAILED.inc();
        }
        result
    }

    async fn place_order(
        &self,
        session_id: &str,
        cart: &Cart,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Result<CheckoutReceipt, ServiceError> {
        let (items, reservations) = self.reserve_cart(cart).await?;

        let order_id = format!("ORD-{}", Uuid::new_v4().simple()).to_uppercase();
        let order = Order::new(
            order_id.clone(),
            session_id.to_string(),
            items,
            self.currency.clone(),
            reservations,
            self.clock.now(),
        );

        if let Err(e) = self.insert_order(&order).await {
            self.ledger.release_all(&order.reservations).await;
            return Err(e);
        }
        info!(order_id = %order.order_id, amount = order.amount, "Order created");
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: order.order_id.clone(),
                amount: order.amount,
            })
            .await;

        let intent = match tokio::time::timeout(self.gateway_timeout, gateway.create_intent(&order))
            .await
        {
            Ok(Ok(intent)) => intent,
            Ok(Err(e)) => return Err(self.abandon(&order, e).await),
            Err(_) => {
                let e = ServiceError::GatewayError(format!("{} intent creation timed out", gateway.name()));
                return Err(self.abandon(&order, e).await);
            }
        };

        // Index first so a webhook racing the status write can still find the order.
        if let Err(e) = self
            .store
            .set(
                &gateway_index_key(gateway.name(), &intent.gateway_ref),
                &order.order_id,
                None,
            )
            .await
        {
            return Err(self.discard(&order, e.into()).await);
        }

        let gateway_label = gateway.name().to_string();
        let gateway_ref = intent.gateway_ref.clone();
        let attached = self
            .update_order(&order.order_id, |order, _| {
                if order.status != OrderStatus::Created {
                    return Err(ServiceError::InvalidTransition(format!(
                        "cannot attach payment intent to {} order",
                        order.status
                    )));
                }
                order.status = OrderStatus::PaymentPending;
                order.gateway = Some(gateway_label.clone());
                order.gateway_ref = Some(gateway_ref.clone());
                Ok(true)
            })
            .await;
        let (before, after) = match attached {
            Ok(pair) => pair,
            Err(e) => return Err(self.discard(&order, e).await),
        };
        self.emit_status_change(&before, &after).await;

        if let Err(e) = self.carts.clear(session_id).await {
            warn!(session_id = %session_id, error = %e, "Failed to clear cart after checkout");
        }

        Ok(CheckoutReceipt {
            gateway: gateway.name().to_string(),
            order_id: after.order_id,
            gateway_ref: intent.gateway_ref,
            amount: after.amount,
            currency: after.currency,
            client_payload: intent.client_payload,
        })
    }

    async fn reserve_cart(
        &self,
        cart: &Cart,
    ) -> Result<(Vec<OrderItem>, Vec<ReservationToken>), ServiceError> {
        let mut items = Vec::with_capacity(cart.items.len());
        let mut reservations = Vec::with_capacity(cart.items.len());

        for line in &cart.items {
            let outcome = match self.catalog.get(&line.product_id).await {
                Ok(Some(product)) => self
                    .ledger
                    .reserve(&product.id, line.qty)
                    .await
                    .map(|token| (product, token)),
                Ok(None) => Err(ServiceError::StockUnavailable(line.product_id.clone())),
                Err(e) => Err(e),
            };

            match outcome {
                Ok((product, token)) => {
                    items.push(OrderItem {
                        product_id: product.id,
                        qty: line.qty,
                        unit_price: product.price,
                        name: product.name,
                    });
                    reservations.push(token);
                }
                Err(e) => {
                    self.ledger.release_all(&reservations).await;
                    return Err(match e {
                        ServiceError::OutOfStock { product_id, .. } => {
                            ServiceError::StockUnavailable(product_id)
                        }
                        other => other,
                    });
                }
            }
        }

        Ok((items, reservations))
    }

    async fn insert_order(&self, order: &Order) -> Result<(), ServiceError> {
        let data = serde_json::to_string(order)?;
        if self
            .store
            .compare_and_swap(&order_key(&order.order_id), None, &data, None)
            .await?
        {
            Ok(())
        } else {
            Err(ServiceError::ConcurrentModification(order.order_id.clone()))
        }
    }

    /// Releases the order's reservations and deletes it.
    async fn discard(&self, order: &Order, cause: ServiceError) -> ServiceError {
        warn!(order_id = %order.order_id, error = %cause, "Checkout failed; discarding order");
        self.ledger.release_all(&order.reservations).await;
        if let Err(e) = self.store.delete(&order_key(&order.order_id)).await {
            error!(order_id = %order.order_id, error = %e, "Failed to discard abandoned order");
        }
        cause
    }

    /// Rolls back a checkout whose intent could not be created.
    async fn abandon(&self, order: &Order, cause: ServiceError) -> ServiceError {
        match self.discard(order, cause).await {
            e @ ServiceError::GatewayError(_) => e,
            other => ServiceError::GatewayError(other.to_string()),
        }
    }

    /// CAS loop over an order. `apply` returns `false` to leave the order untouched.
    async fn update_order<F>(&self, order_id: &str, mut apply: F) -> Result<(Order, Order), ServiceError>
    where
        F: FnMut(&mut Order, DateTime<Utc>) -> Result<bool, ServiceError>,
    {
        let key = order_key(order_id);
        for _ in 0..MAX_CAS_ATTEMPTS {
            let (mut order, raw) = get_versioned::<Order>(self.store.as_ref(), &key)
                .await?
                .ok_or_else(|| ServiceError::UnknownOrder(order_id.to_string()))?;
            let before = order.clone();

            let now = self.clock.now();
            if !apply(&mut order, now)? {
                return Ok((before, order));
            }
            order.updated_at = Some(now);

            let data = serde_json::to_string(&order)?;
            if self
                .store
                .compare_and_swap(&key, Some(&raw), &data, None)
                .await?
            {
                return Ok((before, order));
            }
            metrics::CAS_CONFLICTS.inc();
        }
        Err(ServiceError::ConcurrentModification(key))
    }

    async fn emit_status_change(&self, before: &Order, after: &Order) {
        if before.status != after.status {
            info!(
                order_id = %after.order_id,
                from = %before.status,
                to = %after.status,
                "Order status changed"
            );
            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id: after.order_id.clone(),
                    old_status: before.status,
                    new_status: after.status,
                })
                .await;
        }
    }

    /// Verifies, dedupes and applies a webhook delivery.
    ///
    /// Signature failures are returned before any state is touched. A delivery
    /// whose event id was already processed is acknowledged as a duplicate. The
    /// event id is recorded only after the event has been applied.
    #[instrument(skip(self, payload, headers))]
    pub async fn process_webhook(
        &self,
        gateway_name: &str,
        payload: &[u8],
        headers: &HeaderMap,
    ) -> Result<WebhookOutcome, ServiceError> {
        let gateway = self.gateways.get(gateway_name)?;
        metrics::WEBHOOKS_RECEIVED.inc();

        let event = match gateway.verify_callback(payload, headers) {
            Ok(event) => event,
            Err(e) => {
                metrics::WEBHOOKS_REJECTED.inc();
                warn!(gateway = gateway.name(), error = %e, "Webhook rejected");
                return Err(e);
            }
        };

        let marker = event
            .event_id
            .as_ref()
            .map(|event_id| webhook_event_key(gateway.name(), event_id));
        if let Some(key) = &marker {
            if self.store.get(key).await?.is_some() {
                metrics::WEBHOOKS_DUPLICATE.inc();
                info!(gateway = gateway.name(), key = %key, "Webhook event already processed");
                return Ok(WebhookOutcome::Duplicate);
            }
        }

        let outcome = self.handle_payment_event(gateway.name(), &event).await?;

        // Recorded only once applied; a crash before this point leaves the
        // redelivery free to retry, and the order CAS absorbs any replay.
        if let Some(key) = &marker {
            if let Err(e) = self
                .store
                .set_nx(key, "1", Some(self.webhook_dedupe_ttl))
                .await
            {
                warn!(key = %key, error = %e, "Failed to record webhook event id");
            }
        }

        self.event_sender
            .send_or_log(Event::PaymentWebhookProcessed {
                gateway: gateway.name().to_string(),
                event_id: event.event_id.clone(),
                order_id: match &outcome {
                    WebhookOutcome::Applied { order_id, .. } => Some(order_id.clone()),
                    _ => event.order_id.clone(),
                },
                outcome: outcome.label().to_string(),
            })
            .await;
        Ok(outcome)
    }

    /// Drives the state machine from an already verified gateway event.
    pub async fn handle_payment_event(
        &self,
        gateway_name: &str,
        event: &GatewayEvent,
    ) -> Result<WebhookOutcome, ServiceError> {
        if event.kind == GatewayEventKind::Ignored {
            debug!(event_type = %event.event_type, "Ignoring webhook event type");
            return Ok(WebhookOutcome::Ignored("event type not handled"));
        }

        let Some(order_id) = self.resolve_order_id(gateway_name, event).await? else {
            info!(event_type = %event.event_type, "Webhook for unknown order acknowledged");
            return Ok(WebhookOutcome::Ignored("unknown order"));
        };

        let result = match event.kind {
            GatewayEventKind::Succeeded => self.confirm_payment(&order_id).await,
            GatewayEventKind::Failed => self.fail_payment(&order_id).await,
            GatewayEventKind::Ignored => Ok(WebhookOutcome::Ignored("event type not handled")),
        };

        match result {
            Err(ServiceError::UnknownOrder(_)) => Ok(WebhookOutcome::Ignored("unknown order")),
            Err(ServiceError::AlreadyFinalized(_)) => {
                Ok(WebhookOutcome::Ignored("order already finalized"))
            }
            other => other,
        }
    }

    async fn resolve_order_id(
        &self,
        gateway_name: &str,
        event: &GatewayEvent,
    ) -> Result<Option<String>, ServiceError> {
        if let Some(order_id) = &event.order_id {
            return Ok(Some(order_id.clone()));
        }
        match &event.gateway_ref {
            Some(gateway_ref) => Ok(self
                .store
                .get(&gateway_index_key(gateway_name, gateway_ref))
                .await?),
            None => Ok(None),
        }
    }

    /// `payment_pending -> paid`, then commit every reservation.
    #[instrument(skip(self))]
    async fn confirm_payment(&self, order_id: &str) -> Result<WebhookOutcome, ServiceError> {
        let (before, after) = self
            .update_order(order_id, |order, now| match order.status {
                OrderStatus::PaymentPending => {
                    order.status = OrderStatus::Paid;
                    order.paid_at = Some(now);
                    Ok(true)
                }
                // Replays for a paid order fall through to the idempotent commit below.
                OrderStatus::Paid => Ok(false),
                OrderStatus::Created => Err(ServiceError::ConcurrentModification(format!(
                    "order {} is still awaiting its payment intent",
                    order.order_id
                ))),
                status => Err(ServiceError::AlreadyFinalized(format!(
                    "order {} is {}",
                    order.order_id, status
                ))),
            })
            .await?;

        let applied = before.status != after.status;
        if applied {
            metrics::ORDERS_PAID.inc();
            self.emit_status_change(&before, &after).await;
        }

        self.commit_reservations(&after).await?;

        if applied {
            Ok(WebhookOutcome::Applied {
                order_id: after.order_id,
                status: after.status,
            })
        } else {
            Ok(WebhookOutcome::Ignored("order already paid"))
        }
    }

    /// Commits are idempotent, so this is safe to repeat for a paid order.
    async fn commit_reservations(&self, order: &Order) -> Result<(), ServiceError> {
        for token in &order.reservations {
            match self.ledger.commit(token).await {
                Ok(_) => {}
                Err(ServiceError::OutOfStock { .. }) => {
                    error!(
                        order_id = %order.order_id,
                        product_id = %token.product_id,
                        quantity = token.quantity,
                        "Reservation lapsed and stock is gone; paid order is short"
                    );
                    self.event_sender
                        .send_or_log(Event::InventoryShortfall {
                            order_id: order.order_id.clone(),
                            product_id: token.product_id.clone(),
                            quantity: token.quantity,
                        })
                        .await;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// `payment_pending -> cancelled`, then release every reservation.
    #[instrument(skip(self))]
    async fn fail_payment(&self, order_id: &str) -> Result<WebhookOutcome, ServiceError> {
        let (before, after) = self
            .update_order(order_id, |order, now| match order.status {
                OrderStatus::PaymentPending => {
                    order.status = OrderStatus::Cancelled;
                    order.cancelled_at = Some(now);
                    Ok(true)
                }
                OrderStatus::Created => Err(ServiceError::ConcurrentModification(format!(
                    "order {} is still awaiting its payment intent",
                    order.order_id
                ))),
                status => Err(ServiceError::AlreadyFinalized(format!(
                    "order {} is {}",
                    order.order_id, status
                ))),
            })
            .await?;

        metrics::ORDERS_CANCELLED.inc();
        self.emit_status_change(&before, &after).await;
        self.ledger.release_all(&after.reservations).await;

        Ok(WebhookOutcome::Applied {
            order_id: after.order_id,
            status: after.status,
        })
    }

    /// Admin delivery update. Re-setting the current status is a no-op.
    #[instrument(skip(self))]
    pub async fn set_delivery_status(
        &self,
        order_id: &str,
        status: DeliveryStatus,
    ) -> Result<Order, ServiceError> {
        let (before, after) = self
            .update_order(order_id, |order, _| {
                if order.status != OrderStatus::Paid {
                    return Err(ServiceError::InvalidTransition(format!(
                        "delivery status cannot change while order is {}",
                        order.status
                    )));
                }
                if order.delivery_status == status {
                    return Ok(false);
                }
                if order.delivery_status.next() != Some(status) {
                    return Err(ServiceError::InvalidTransition(format!(
                        "delivery status cannot move from {} to {}",
                        order.delivery_status, status
                    )));
                }
                order.delivery_status = status;
                Ok(true)
            })
            .await?;

        if before.delivery_status != after.delivery_status {
            info!(order_id = %order_id, from = %before.delivery_status, to = %after.delivery_status, "Delivery status changed");
            self.event_sender
                .send_or_log(Event::DeliveryStatusChanged {
                    order_id: order_id.to_string(),
                    old_status: before.delivery_status,
                    new_status: after.delivery_status,
                })
                .await;
        }
        Ok(after)
    }

    /// `paid -> refunded`. Stock is not returned to the ledger.
    #[instrument(skip(self))]
    pub async fn refund(&self, order_id: &str) -> Result<Order, ServiceError> {
        let (before, after) = self
            .update_order(order_id, |order, now| {
                if !order.status.can_transition_to(OrderStatus::Refunded) {
                    return Err(ServiceError::InvalidTransition(format!(
                        "cannot refund a {} order",
                        order.status
                    )));
                }
                order.status = OrderStatus::Refunded;
                order.refunded_at = Some(now);
                Ok(true)
            })
            .await?;

        metrics::ORDERS_REFUNDED.inc();
        self.emit_status_change(&before, &after).await;
        Ok(after)
    }

    pub async fn get_order(&self, order_id: &str) -> Result<Order, ServiceError> {
        get_json::<Order>(self.store.as_ref(), &order_key(order_id))
            .await?
            .ok_or_else(|| ServiceError::UnknownOrder(order_id.to_string()))
    }

    /// Shopper-facing tracking line for the conversational agent.
    pub async fn tracking_message(&self, order_id: &str) -> Result<String, ServiceError> {
        match get_json::<Order>(self.store.as_ref(), &order_key(order_id)).await? {
            Some(order) if order.status == OrderStatus::Paid => {
                Ok(format!("Your order is {}.", order.delivery_status))
            }
            Some(order) if order.status == OrderStatus::Refunded => {
                Ok("Your order has been refunded.".to_string())
            }
            _ => Ok("Sorry, we couldn't find a paid order with that ID.".to_string()),
        }
    }

    /// Orders in `status` (all orders when `None`), newest first.
    pub async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, ServiceError> {
        let mut orders = Vec::new();
        for key in self.store.keys(ORDER_KEY_PREFIX).await? {
            if key.starts_with(GATEWAY_INDEX_PREFIX) {
                continue;
            }
            if let Some(order) = get_json::<Order>(self.store.as_ref(), &key).await? {
                if status.map_or(true, |s| order.status == s) {
                    orders.push(order);
                }
            }
        }
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }
}
