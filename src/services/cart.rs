use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics;
use crate::models::Cart;
use crate::store::{get_versioned, Clock, KeyValueStore};

const MAX_CAS_ATTEMPTS: usize = 32;

fn cart_key(session_id: &str) -> String {
    format!("cart:session:{}", session_id)
}

/// Per-session cart. Stock is not checked here; checkout reserves against the
/// live ledger.
#[derive(Clone)]
pub struct CartStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    event_sender: EventSender,
}

impl CartStore {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        event_sender: EventSender,
    ) -> Self {
        Self {
            store,
            clock,
            ttl,
            event_sender,
        }
    }

    /// Merges `qty` into the session's cart, refreshing its TTL.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        session_id: &str,
        product_id: &str,
        qty: i64,
    ) -> Result<Cart, ServiceError> {
        if qty <= 0 || qty > i64::from(u32::MAX) {
            return Err(ServiceError::InvalidQuantity(qty));
        }
        let qty = qty as u32;

        let key = cart_key(session_id);
        let ttl = ChronoDuration::from_std(self.ttl)
            .map_err(|e| ServiceError::InternalError(e.to_string()))?;

        for _ in 0..MAX_CAS_ATTEMPTS {
            let now = self.clock.now();
            let current = get_versioned::<Cart>(self.store.as_ref(), &key).await?;
            let (mut cart, expected) = match current {
                Some((cart, raw)) if cart.expires_at > now => (cart, Some(raw)),
                Some((_, raw)) => (Cart::empty(session_id, now), Some(raw)),
                None => (Cart::empty(session_id, now), None),
            };

            cart.add(product_id, qty);
            cart.updated_at = now;
            cart.expires_at = now + ttl;

            let data = serde_json::to_string(&cart)?;
            if self
                .store
                .compare_and_swap(&key, expected.as_deref(), &data, Some(self.ttl))
                .await?
            {
                debug!(items = cart.items.len(), "Cart updated");
                self.event_sender
                    .send_or_log(Event::CartUpdated {
                        session_id: session_id.to_string(),
                        product_id: product_id.to_string(),
                        qty,
                    })
                    .await;
                return Ok(cart);
            }
            metrics::CAS_CONFLICTS.inc();
        }

        warn!(session_id = %session_id, "Cart contention exceeded retry budget");
        Err(ServiceError::ConcurrentModification(key))
    }

    /// Returns an empty cart when none exists or it has lapsed.
    pub async fn get_cart(&self, session_id: &str) -> Result<Cart, ServiceError> {
        let now = self.clock.now();
        let cart = get_versioned::<Cart>(self.store.as_ref(), &cart_key(session_id))
            .await?
            .map(|(cart, _)| cart)
            .filter(|cart| cart.expires_at > now);
        Ok(cart.unwrap_or_else(|| Cart::empty(session_id, now)))
    }

    pub async fn clear(&self, session_id: &str) -> Result<(), ServiceError> {
        self.store.delete(&cart_key(session_id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, ManualClock};
    use assert_matches::assert_matches;
    use tokio::sync::mpsc;

    fn carts() -> (CartStore, ManualClock) {
        let (tx, mut rx) = mpsc::channel(64);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        let clock = ManualClock::default();
        let carts = CartStore::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(clock.clone()),
            Duration::from_secs(1800),
            EventSender::new(tx),
        );
        (carts, clock)
    }

    #[tokio::test]
    async fn non_positive_quantities_are_rejected_without_side_effects() {
        let (carts, _) = carts();
        assert_matches!(
            carts.add_item("s1", "P1", 0).await,
            Err(ServiceError::InvalidQuantity(0))
        );
        assert_matches!(
            carts.add_item("s1", "P1", -3).await,
            Err(ServiceError::InvalidQuantity(-3))
        );
        assert!(carts.get_cart("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_adds_are_not_lost() {
        let (carts, _) = carts();
        let mut tasks = Vec::new();
        for _ in 0..10 {
            let carts = carts.clone();
            tasks.push(tokio::spawn(async move {
                carts.add_item("s1", "P1", 1).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let cart = carts.get_cart("s1").await.unwrap();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].qty, 10);
    }

    #[tokio::test]
    async fn lapsed_cart_starts_over() {
        let (carts, clock) = carts();
        carts.add_item("s1", "P1", 2).await.unwrap();
        clock.advance(ChronoDuration::minutes(31));
        assert!(carts.get_cart("s1").await.unwrap().is_empty());

        let cart = carts.add_item("s1", "P2", 1).await.unwrap();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].product_id, "P2");
    }

    #[tokio::test]
    async fn clear_empties_the_cart() {
        let (carts, _) = carts();
        carts.add_item("s1", "P1", 1).await.unwrap();
        carts.clear("s1").await.unwrap();
        assert!(carts.get_cart("s1").await.unwrap().is_empty());
    }
}
