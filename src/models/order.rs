use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::ReservationToken;

/// Payment axis of an order.
///
/// Moves forward only: `created -> payment_pending -> paid | cancelled`,
/// and `paid -> refunded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Created,
    PaymentPending,
    Paid,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Created, OrderStatus::PaymentPending)
                | (OrderStatus::PaymentPending, OrderStatus::Paid)
                | (OrderStatus::PaymentPending, OrderStatus::Cancelled)
                | (OrderStatus::Paid, OrderStatus::Refunded)
        )
    }
}

/// Delivery axis, meaningful once the order is paid.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeliveryStatus {
    Processing,
    Shipped,
    Delivered,
}

impl DeliveryStatus {
    pub fn next(self) -> Option<DeliveryStatus> {
        match self {
            DeliveryStatus::Processing => Some(DeliveryStatus::Shipped),
            DeliveryStatus::Shipped => Some(DeliveryStatus::Delivered),
            DeliveryStatus::Delivered => None,
        }
    }
}

/// Price snapshot of one cart line taken at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub qty: u32,
    /// Unit price in minor currency units
    pub unit_price: i64,
    pub name: String,
}

impl OrderItem {
    pub fn line_total(&self) -> i64 {
        self.unit_price * i64::from(self.qty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    pub session_id: String,
    pub items: Vec<OrderItem>,
    /// Sum of `unit_price * qty`, fixed at creation
    pub amount: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub delivery_status: DeliveryStatus,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub gateway_ref: Option<String>,
    #[serde(default)]
    pub reservations: Vec<ReservationToken>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(
        order_id: String,
        session_id: String,
        items: Vec<OrderItem>,
        currency: String,
        reservations: Vec<ReservationToken>,
        now: DateTime<Utc>,
    ) -> Self {
        let amount = items.iter().map(OrderItem::line_total).sum();
        Self {
            order_id,
            session_id,
            items,
            amount,
            currency,
            status: OrderStatus::Created,
            delivery_status: DeliveryStatus::Processing,
            gateway: None,
            gateway_ref: None,
            reservations,
            created_at: now,
            paid_at: None,
            updated_at: None,
            cancelled_at: None,
            refunded_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn refund_is_only_reachable_from_paid() {
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Refunded));
        assert!(!OrderStatus::Created.can_transition_to(OrderStatus::Refunded));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Refunded));
        assert!(!OrderStatus::PaymentPending.can_transition_to(OrderStatus::Refunded));
    }

    #[test]
    fn delivery_moves_one_step_at_a_time() {
        assert_eq!(
            DeliveryStatus::Processing.next(),
            Some(DeliveryStatus::Shipped)
        );
        assert_eq!(
            DeliveryStatus::Shipped.next(),
            Some(DeliveryStatus::Delivered)
        );
        assert_eq!(DeliveryStatus::Delivered.next(), None);
    }

    #[test]
    fn statuses_use_snake_case_on_the_wire() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::PaymentPending).unwrap(),
            "\"payment_pending\""
        );
        assert_eq!(
            OrderStatus::from_str("payment_pending").unwrap(),
            OrderStatus::PaymentPending
        );
        assert_eq!(
            DeliveryStatus::from_str("shipped").unwrap(),
            DeliveryStatus::Shipped
        );
    }

    #[test]
    fn amount_is_snapshotted_from_items() {
        let order = Order::new(
            "ORD-1".into(),
            "s1".into(),
            vec![
                OrderItem {
                    product_id: "P1".into(),
                    qty: 2,
                    unit_price: 129_900,
                    name: "Tee".into(),
                },
                OrderItem {
                    product_id: "P2".into(),
                    qty: 1,
                    unit_price: 99_900,
                    name: "Classic".into(),
                },
            ],
            "INR".into(),
            vec![],
            Utc::now(),
        );
        assert_eq!(order.amount, 359_700);
        assert_eq!(order.status, OrderStatus::Created);
    }
}
