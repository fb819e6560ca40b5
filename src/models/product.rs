use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Prices are stored in minor units (paise); budgets arrive in major units (rupees).
pub const MINOR_UNITS_PER_MAJOR: i64 = 100;

/// Catalog entry. `quantity` is the ledger's on-hand count at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Unit price in minor currency units
    pub price: i64,
    #[serde(default)]
    pub sizes: BTreeSet<String>,
    #[serde(default)]
    pub quantity: u32,
}

impl Product {
    pub fn has_size(&self, size: &str) -> bool {
        self.sizes.contains(size)
    }
}
