use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::errors::ServiceError;
use crate::metrics;
use crate::models::{Product, SessionFilters, MINOR_UNITS_PER_MAJOR};
use crate::services::inventory::InventoryLedger;
use crate::store::{get_json, get_versioned, set_json, KeyValueStore};

const PRODUCT_INDEX_KEY: &str = "products:index";
const MAX_CAS_ATTEMPTS: usize = 32;

fn product_key(product_id: &str) -> String {
    format!("product:{}", product_id)
}

/// Product catalog. Descriptive fields live at `product:{id}`; stock is owned
/// by the [`InventoryLedger`] and overlaid onto `quantity` on every read.
#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn KeyValueStore>,
    ledger: InventoryLedger,
}

impl CatalogService {
    pub fn new(store: Arc<dyn KeyValueStore>, ledger: InventoryLedger) -> Self {
        Self { store, ledger }
    }

    pub async fn get(&self, product_id: &str) -> Result<Option<Product>, ServiceError> {
        let Some(mut product) = get_json::<Product>(self.store.as_ref(), &product_key(product_id)).await?
        else {
            return Ok(None);
        };
        product.quantity = self.ledger.level(product_id).await?.on_hand;
        Ok(Some(product))
    }

    pub async fn require(&self, product_id: &str) -> Result<Product, ServiceError> {
        self.get(product_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("product {}", product_id)))
    }

    /// Writes descriptive fields and sets on-hand stock to `product.quantity`.
    #[instrument(skip(self, product), fields(product_id = %product.id))]
    pub async fn upsert(&self, product: &Product) -> Result<(), ServiceError> {
        if product.id.trim().is_empty() {
            return Err(ServiceError::InvalidInput("product id must not be empty".into()));
        }
        if product.price < 0 {
            return Err(ServiceError::InvalidInput("price must not be negative".into()));
        }

        set_json(self.store.as_ref(), &product_key(&product.id), product, None).await?;
        self.ledger.set_on_hand(&product.id, product.quantity).await?;
        self.index_product(&product.id).await
    }

    async fn index_product(&self, product_id: &str) -> Result<(), ServiceError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current =
                get_versioned::<BTreeSet<String>>(self.store.as_ref(), PRODUCT_INDEX_KEY).await?;
            let (mut ids, expected) = match current {
                Some((ids, raw)) => (ids, Some(raw)),
                None => (BTreeSet::new(), None),
            };
            if !ids.insert(product_id.to_string()) {
                return Ok(());
            }

            let data = serde_json::to_string(&ids)?;
            if self
                .store
                .compare_and_swap(PRODUCT_INDEX_KEY, expected.as_deref(), &data, None)
                .await?
            {
                return Ok(());
            }
            metrics::CAS_CONFLICTS.inc();
        }
        Err(ServiceError::ConcurrentModification(PRODUCT_INDEX_KEY.into()))
    }

    pub async fn product_ids(&self) -> Result<Vec<String>, ServiceError> {
        Ok(get_json::<BTreeSet<String>>(self.store.as_ref(), PRODUCT_INDEX_KEY)
            .await?
            .map(|ids| ids.into_iter().collect())
            .unwrap_or_default())
    }

    pub async fn list(&self) -> Result<Vec<Product>, ServiceError> {
        let mut products = Vec::new();
        for id in self.product_ids().await? {
            if let Some(product) = self.get(&id).await? {
                products.push(product);
            }
        }
        Ok(products)
    }

    /// Linear scan over the catalog. Products with nothing available are hidden.
    pub async fn search(&self, filters: &SessionFilters) -> Result<Vec<Product>, ServiceError> {
        let mut matches = Vec::new();
        for product in self.list().await? {
            if !matches_filters(&product, filters) {
                continue;
            }
            if self.ledger.available(&product.id).await? == 0 {
                continue;
            }
            matches.push(product);
        }
        Ok(matches)
    }

    /// Loads the demo catalog. Existing entries are overwritten.
    pub async fn seed_demo(&self) -> Result<usize, ServiceError> {
        let products = demo_catalog();
        for product in &products {
            self.upsert(product).await?;
        }
        info!(count = products.len(), "Seeded demo catalog");
        Ok(products.len())
    }
}

pub fn matches_filters(product: &Product, filters: &SessionFilters) -> bool {
    if let Some(intent) = filters.intent.as_deref().filter(|s| !s.trim().is_empty()) {
        if !product
            .category
            .to_lowercase()
            .contains(&intent.trim().to_lowercase())
        {
            return false;
        }
    }

    if let Some(color) = filters.color.as_deref().filter(|s| !s.trim().is_empty()) {
        match product.color.as_deref() {
            Some(c) if c.eq_ignore_ascii_case(color.trim()) => {}
            _ => return false,
        }
    }

    if let Some(size) = filters.size.as_deref().filter(|s| !s.trim().is_empty()) {
        if !product.has_size(size.trim()) {
            return false;
        }
    }

    if let Some(budget) = filters.budget {
        if product.price > budget.saturating_mul(MINOR_UNITS_PER_MAJOR) {
            return false;
        }
    }

    true
}

fn demo_product(
    id: &str,
    name: &str,
    category: &str,
    color: &str,
    rupees: i64,
    quantity: u32,
    sizes: &[&str],
) -> Product {
    Product {
        id: id.to_string(),
        name: name.to_string(),
        category: category.to_string(),
        color: Some(color.to_string()),
        price: rupees * MINOR_UNITS_PER_MAJOR,
        sizes: sizes.iter().map(|s| s.to_string()).collect(),
        quantity,
    }
}

pub fn demo_catalog() -> Vec<Product> {
    vec![
        demo_product("P3001", "Black Oversized T-Shirt", "tshirts", "black", 1299, 40, &["M", "L", "XL"]),
        demo_product("P3002", "White Classic T-Shirt", "tshirts", "white", 999, 25, &["S", "M", "L"]),
        demo_product("P4001", "Blue Denim Jeans", "jeans", "blue", 2199, 20, &["30", "32", "34", "36"]),
        demo_product("P5001", "Grey Hoodie", "hoodies", "grey", 2499, 15, &["M", "L", "XL"]),
    ]
}
