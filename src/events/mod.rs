use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::models::{DeliveryStatus, OrderStatus};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the consumer is gone.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

// Events emitted by the checkout core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    SessionStarted {
        session_id: String,
    },
    CartUpdated {
        session_id: String,
        product_id: String,
        qty: u32,
    },

    // Order events
    OrderCreated {
        order_id: String,
        amount: i64,
    },
    OrderStatusChanged {
        order_id: String,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    DeliveryStatusChanged {
        order_id: String,
        old_status: DeliveryStatus,
        new_status: DeliveryStatus,
    },

    // Inventory events
    InventoryReserved {
        product_id: String,
        quantity: u32,
        reservation_id: String,
    },
    InventoryReleased {
        product_id: String,
        quantity: u32,
        reservation_id: String,
    },
    InventoryCommitted {
        product_id: String,
        quantity: u32,
        reservation_id: String,
    },
    InventoryRestocked {
        product_id: String,
        quantity: u32,
        on_hand: u32,
    },
    InventoryShortfall {
        order_id: String,
        product_id: String,
        quantity: u32,
    },

    // Payment events
    PaymentWebhookProcessed {
        gateway: String,
        event_id: Option<String>,
        order_id: Option<String>,
        outcome: String,
    },
}

// Handlers implementing this trait process events asynchronously.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Writes every event to the structured log.
pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn handle_event(&self, event: &Event) -> Result<(), String> {
        match event {
            Event::InventoryShortfall {
                order_id,
                product_id,
                quantity,
            } => {
                error!(
                    order_id = %order_id,
                    product_id = %product_id,
                    quantity,
                    "Paid order could not commit stock; manual fulfilment review required"
                );
            }
            other => info!(event = ?other, "Domain event"),
        }
        Ok(())
    }
}

// Drains the channel and hands each event to every registered handler.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        for handler in &handlers {
            if let Err(e) = handler.handle_event(&event).await {
                error!("Failed to handle event {:?}: {}", event, e);
            }
        }
    }

    info!("Event channel closed; event processing loop stopped");
}
