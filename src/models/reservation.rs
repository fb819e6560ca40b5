use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Handle to an outstanding stock hold, returned by the inventory ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationToken {
    pub id: String,
    pub product_id: String,
    pub quantity: u32,
    pub expires_at: DateTime<Utc>,
}
