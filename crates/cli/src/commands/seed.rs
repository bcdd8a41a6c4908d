//! `apotheca seed` — create the schema and seed demo data.

use apotheca_config::AppConfig;
use apotheca_store::{seed::seed_if_empty, Store};
use tracing::info;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let store = Store::open(&config.database.url).await?;
    seed_if_empty(&store).await?;
    info!(database = %config.database.url, "Store ready (created tables; seeded if empty)");
    Ok(())
}
