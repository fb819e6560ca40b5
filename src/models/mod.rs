//! Records owned by the checkout core.
//!
//! All records are persisted as camelCase JSON in the key-value store.

pub mod cart;
pub mod order;
pub mod product;
pub mod reservation;
pub mod session;

pub use cart::{Cart, CartItem};
pub use order::{DeliveryStatus, Order, OrderItem, OrderStatus};
pub use product::{Product, MINOR_UNITS_PER_MAJOR};
pub use reservation::ReservationToken;
pub use session::{Session, SessionFilters};
