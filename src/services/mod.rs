// Stock and catalog
pub mod catalog;
pub mod inventory;

// Shopper state
pub mod cart;
pub mod sessions;

// Order lifecycle and checkout
pub mod orders;

pub use cart::CartStore;
pub use catalog::CatalogService;
pub use inventory::{CommitOutcome, InventoryLedger, StockLevel};
pub use orders::{CheckoutReceipt, OrderService, OrderServiceSettings, WebhookOutcome};
pub use sessions::SessionStore;
