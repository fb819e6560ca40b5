//! Seed data script - loads the demo catalog into the Redis store
//!
//! Run with: cargo run --bin seed-data -- --redis-url redis://127.0.0.1:6379

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

use axionik_checkout::events::EventSender;
use axionik_checkout::models::MINOR_UNITS_PER_MAJOR;
use axionik_checkout::services::{CatalogService, InventoryLedger};
use axionik_checkout::store::{KeyValueStore, RedisStore, SystemClock};

#[derive(Debug, Parser)]
#[command(name = "seed-data", about = "Load the demo product catalog")]
struct Args {
    /// Redis connection URL
    #[arg(long, env = "APP__REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Per-command store timeout in milliseconds
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,

    /// Print the catalog after seeding
    #[arg(long)]
    list: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    info!("Connecting to store: {}", args.redis_url);
    let store: Arc<dyn KeyValueStore> = Arc::new(
        RedisStore::connect(&args.redis_url, Duration::from_millis(args.timeout_ms)).await?,
    );

    let (tx, mut rx) = mpsc::channel(64);
    let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let ledger = InventoryLedger::new(
        store.clone(),
        Arc::new(SystemClock),
        chrono::Duration::minutes(5),
        EventSender::new(tx),
    );
    let catalog = CatalogService::new(store, ledger);

    let count = catalog.seed_demo().await?;
    info!("Seeded {} products", count);

    if args.list {
        for product in catalog.list().await? {
            info!(
                "  {} {:<28} {:>8.2} qty={:<3} sizes={:?}",
                product.id,
                product.name,
                product.price as f64 / MINOR_UNITS_PER_MAJOR as f64,
                product.quantity,
                product.sizes
            );
        }
    }

    drop(catalog);
    drain.abort();
    Ok(())
}
