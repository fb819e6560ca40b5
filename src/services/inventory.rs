//! Inventory Ledger
//!
//! Owns the on-hand quantity of every product together with the outstanding
//! holds against it. Each product's stock lives in a single record
//! (`inventory:{product_id}`), so one compare-and-swap is the serialization
//! point for reserve, commit, release and restock on that product.
//!
//! Available stock is `on_hand - sum(outstanding holds)`. Holds carry an
//! expiry; an expired hold is dropped on the next write to the record (or by
//! [`InventoryLedger::sweep_expired`]) and no longer counts against stock.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics;
use crate::models::ReservationToken;
use crate::store::{get_versioned, Clock, KeyValueStore};

const MAX_CAS_ATTEMPTS: usize = 64;

/// How long committed reservation ids are remembered for idempotent commits.
const COMMIT_RETENTION_HOURS: i64 = 24;

fn stock_key(product_id: &str) -> String {
    format!("inventory:{}", product_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Hold {
    id: String,
    quantity: u32,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommittedHold {
    id: String,
    quantity: u32,
    committed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StockRecord {
    product_id: String,
    on_hand: u32,
    #[serde(default)]
    holds: Vec<Hold>,
    #[serde(default)]
    committed: Vec<CommittedHold>,
}

impl StockRecord {
    fn empty(product_id: &str) -> Self {
        Self {
            product_id: product_id.to_string(),
            on_hand: 0,
            holds: Vec::new(),
            committed: Vec::new(),
        }
    }

    fn reserved(&self) -> u32 {
        self.holds
            .iter()
            .fold(0u32, |acc, hold| acc.saturating_add(hold.quantity))
    }

    fn available(&self) -> u32 {
        self.on_hand.saturating_sub(self.reserved())
    }

    /// Drops expired holds and stale commit markers; returns the expired holds.
    fn prune(&mut self, now: DateTime<Utc>) -> Vec<Hold> {
        let (expired, live): (Vec<Hold>, Vec<Hold>) = std::mem::take(&mut self.holds)
            .into_iter()
            .partition(|hold| hold.expires_at <= now);
        self.holds = live;

        let horizon = now - Duration::hours(COMMIT_RETENTION_HOURS);
        self.committed.retain(|c| c.committed_at > horizon);
        expired
    }

    fn is_committed(&self, reservation_id: &str) -> bool {
        self.committed.iter().any(|c| c.id == reservation_id)
    }
}

/// Point-in-time view of a product's stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockLevel {
    pub on_hand: u32,
    pub reserved: u32,
    pub available: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    AlreadyCommitted,
}

enum Mutation<R> {
    Write(R),
    Skip(R),
}

#[derive(Clone)]
pub struct InventoryLedger {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    reservation_ttl: Duration,
    event_sender: EventSender,
}

impl InventoryLedger {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        reservation_ttl: Duration,
        event_sender: EventSender,
    ) -> Self {
        Self {
            store,
            clock,
            reservation_ttl,
            event_sender,
        }
    }

    /// Read-prune-mutate-CAS loop over one product's stock record.
    async fn update<R, F>(&self, product_id: &str, mut mutate: F) -> Result<R, ServiceError>
    where
        F: FnMut(&mut StockRecord, usize, DateTime<Utc>) -> Result<Mutation<R>, ServiceError>,
    {
        let key = stock_key(product_id);

        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = get_versioned::<StockRecord>(self.store.as_ref(), &key).await?;
            let (mut record, expected) = match current {
                Some((record, raw)) => (record, Some(raw)),
                None => (StockRecord::empty(product_id), None),
            };

            let now = self.clock.now();
            let expired = record.prune(now);

            let result = match mutate(&mut record, expired.len(), now)? {
                Mutation::Skip(result) => return Ok(result),
                Mutation::Write(result) => result,
            };

            let data = serde_json::to_string(&record)?;
            if self
                .store
                .compare_and_swap(&key, expected.as_deref(), &data, None)
                .await?
            {
                if !expired.is_empty() {
                    metrics::RESERVATIONS_EXPIRED.inc_by(expired.len() as u64);
                    for hold in &expired {
                        debug!(
                            product_id = %product_id,
                            reservation_id = %hold.id,
                            quantity = hold.quantity,
                            "Reservation expired and was released"
                        );
                    }
                }
                return Ok(result);
            }

            metrics::CAS_CONFLICTS.inc();
            tokio::task::yield_now().await;
        }

        warn!(product_id = %product_id, "Stock record contention exceeded retry budget");
        Err(ServiceError::ConcurrentModification(key))
    }

    /// Places a hold of `qty` units. Fails with `OutOfStock` if fewer than
    /// `qty` units are available after subtracting outstanding holds.
    #[instrument(skip(self))]
    pub async fn reserve(&self, product_id: &str, qty: u32) -> Result<ReservationToken, ServiceError> {
        if qty == 0 {
            return Err(ServiceError::InvalidQuantity(0));
        }

        let ttl = self.reservation_ttl;
        let result = self
            .update(product_id, |record, _, now| {
                let available = record.available();
                if available < qty {
                    return Err(ServiceError::OutOfStock {
                        product_id: record.product_id.clone(),
                        requested: qty,
                        available,
                    });
                }

                let hold = Hold {
                    id: Uuid::new_v4().to_string(),
                    quantity: qty,
                    expires_at: now + ttl,
                };
                let token = ReservationToken {
                    id: hold.id.clone(),
                    product_id: record.product_id.clone(),
                    quantity: qty,
                    expires_at: hold.expires_at,
                };
                record.holds.push(hold);
                Ok(Mutation::Write(token))
            })
            .await;

        match result {
            Ok(token) => {
                metrics::RESERVATIONS_CREATED.inc();
                self.event_sender
                    .send_or_log(Event::InventoryReserved {
                        product_id: token.product_id.clone(),
                        quantity: token.quantity,
                        reservation_id: token.id.clone(),
                    })
                    .await;
                Ok(token)
            }
            Err(err @ ServiceError::OutOfStock { .. }) => {
                metrics::RESERVATIONS_REJECTED.inc();
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Converts a hold into a permanent decrement of on-hand stock.
    ///
    /// Committing an already-committed token is a no-op. A token whose hold
    /// already expired is committed directly against available stock.
    #[instrument(skip(self), fields(product_id = %token.product_id, reservation_id = %token.id))]
    pub async fn commit(&self, token: &ReservationToken) -> Result<CommitOutcome, ServiceError> {
        let outcome = self
            .update(&token.product_id, |record, _, now| {
                if record.is_committed(&token.id) {
                    return Ok(Mutation::Skip(CommitOutcome::AlreadyCommitted));
                }

                if let Some(pos) = record.holds.iter().position(|h| h.id == token.id) {
                    let hold = record.holds.remove(pos);
                    if record.on_hand < hold.quantity {
                        return Err(ServiceError::OutOfStock {
                            product_id: record.product_id.clone(),
                            requested: hold.quantity,
                            available: record.on_hand,
                        });
                    }
                    record.on_hand -= hold.quantity;
                } else {
                    let available = record.available();
                    if available < token.quantity {
                        return Err(ServiceError::OutOfStock {
                            product_id: record.product_id.clone(),
                            requested: token.quantity,
                            available,
                        });
                    }
                    record.on_hand -= token.quantity;
                }

                record.committed.push(CommittedHold {
                    id: token.id.clone(),
                    quantity: token.quantity,
                    committed_at: now,
                });
                Ok(Mutation::Write(CommitOutcome::Committed))
            })
            .await?;

        if outcome == CommitOutcome::Committed {
            metrics::RESERVATIONS_COMMITTED.inc();
            self.event_sender
                .send_or_log(Event::InventoryCommitted {
                    product_id: token.product_id.clone(),
                    quantity: token.quantity,
                    reservation_id: token.id.clone(),
                })
                .await;
        } else {
            debug!("Reservation already committed");
        }
        Ok(outcome)
    }

    /// Cancels a hold without touching on-hand stock. Returns `false` when the
    /// hold was already gone (released, expired or committed).
    #[instrument(skip(self), fields(product_id = %token.product_id, reservation_id = %token.id))]
    pub async fn release(&self, token: &ReservationToken) -> Result<bool, ServiceError> {
        let released = self
            .update(&token.product_id, |record, expired, _| {
                match record.holds.iter().position(|h| h.id == token.id) {
                    Some(pos) => {
                        record.holds.remove(pos);
                        Ok(Mutation::Write(true))
                    }
                    None if expired > 0 => Ok(Mutation::Write(false)),
                    None => Ok(Mutation::Skip(false)),
                }
            })
            .await?;

        if released {
            metrics::RESERVATIONS_RELEASED.inc();
            self.event_sender
                .send_or_log(Event::InventoryReleased {
                    product_id: token.product_id.clone(),
                    quantity: token.quantity,
                    reservation_id: token.id.clone(),
                })
                .await;
        }
        Ok(released)
    }

    /// Releases every token, logging (not propagating) individual failures;
    /// anything left behind is reclaimed when its hold expires.
    pub async fn release_all(&self, tokens: &[ReservationToken]) {
        for token in tokens {
            if let Err(e) = self.release(token).await {
                warn!(
                    product_id = %token.product_id,
                    reservation_id = %token.id,
                    error = %e,
                    "Failed to release reservation; it will lapse at its expiry"
                );
            }
        }
    }

    /// Manual restock: adds `qty` units to on-hand stock.
    #[instrument(skip(self))]
    pub async fn restock(&self, product_id: &str, qty: u32) -> Result<StockLevel, ServiceError> {
        if qty == 0 {
            return Err(ServiceError::InvalidQuantity(0));
        }

        let level = self
            .update(product_id, |record, _, _| {
                record.on_hand = match record.on_hand.checked_add(qty) {
                    Some(on_hand) => on_hand,
                    None => {
                        return Err(ServiceError::InvalidInput(
                            "restock would overflow on-hand stock".into(),
                        ))
                    }
                };
                Ok(Mutation::Write(level_of(record)))
            })
            .await?;

        info!(product_id = %product_id, quantity = qty, on_hand = level.on_hand, "Restocked product");
        self.event_sender
            .send_or_log(Event::InventoryRestocked {
                product_id: product_id.to_string(),
                quantity: qty,
                on_hand: level.on_hand,
            })
            .await;
        Ok(level)
    }

    /// Sets on-hand stock outright. Used when seeding the catalog.
    #[instrument(skip(self))]
    pub async fn set_on_hand(&self, product_id: &str, qty: u32) -> Result<StockLevel, ServiceError> {
        self.update(product_id, |record, _, _| {
            record.on_hand = qty;
            Ok(Mutation::Write(level_of(record)))
        })
        .await
    }

    /// Current stock level, ignoring expired holds.
    pub async fn level(&self, product_id: &str) -> Result<StockLevel, ServiceError> {
        let record = get_versioned::<StockRecord>(self.store.as_ref(), &stock_key(product_id))
            .await?
            .map(|(record, _)| record);
        let mut record = record.unwrap_or_else(|| StockRecord::empty(product_id));
        record.prune(self.clock.now());
        Ok(level_of(&record))
    }

    pub async fn available(&self, product_id: &str) -> Result<u32, ServiceError> {
        Ok(self.level(product_id).await?.available)
    }

    /// Writes back records whose holds have expired. Returns the number of
    /// holds reclaimed.
    #[instrument(skip(self, product_ids))]
    pub async fn sweep_expired(&self, product_ids: &[String]) -> Result<usize, ServiceError> {
        let mut reclaimed = 0;
        for product_id in product_ids {
            reclaimed += self
                .update(product_id, |_, expired, _| {
                    if expired > 0 {
                        Ok(Mutation::Write(expired))
                    } else {
                        Ok(Mutation::Skip(0))
                    }
                })
                .await?;
        }
        if reclaimed > 0 {
            info!(reclaimed, "Reclaimed expired inventory reservations");
        }
        Ok(reclaimed)
    }
}

fn level_of(record: &StockRecord) -> StockLevel {
    StockLevel {
        on_hand: record.on_hand,
        reserved: record.reserved(),
        available: record.available(),
    }
}
