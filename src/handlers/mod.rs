pub mod admin;
pub mod carts;
pub mod chat;
pub mod checkout;
pub mod health;
pub mod orders;
pub mod webhooks;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::events::EventSender;
use crate::payments::GatewayRegistry;
use crate::services::{
    CartStore, CatalogService, InventoryLedger, OrderService, OrderServiceSettings, SessionStore,
};
use crate::store::{Clock, KeyValueStore};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub sessions: SessionStore,
    pub carts: CartStore,
    pub catalog: CatalogService,
    pub ledger: InventoryLedger,
    pub orders: OrderService,
}

impl AppServices {
    /// Wires every service onto one store and clock.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        gateways: GatewayRegistry,
        event_sender: EventSender,
        config: &AppConfig,
    ) -> Self {
        let ledger = InventoryLedger::new(
            store.clone(),
            clock.clone(),
            config.reservation_ttl(),
            event_sender.clone(),
        );
        let catalog = CatalogService::new(store.clone(), ledger.clone());
        let sessions = SessionStore::new(
            store.clone(),
            clock.clone(),
            config.session_ttl(),
            event_sender.clone(),
        );
        let carts = CartStore::new(
            store.clone(),
            clock.clone(),
            config.cart_ttl(),
            event_sender.clone(),
        );
        let orders = OrderService::new(
            store,
            clock,
            carts.clone(),
            catalog.clone(),
            ledger.clone(),
            gateways,
            event_sender,
            OrderServiceSettings {
                currency: config.currency.clone(),
                gateway_timeout: config.gateway_timeout(),
                webhook_dedupe_ttl: config.webhook_dedupe_ttl(),
            },
        );

        Self {
            sessions,
            carts,
            catalog,
            ledger,
            orders,
        }
    }
}
