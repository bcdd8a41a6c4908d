//! `apotheca serve` — start the HTTP gateway.

use apotheca_config::AppConfig;
use tracing::info;

pub async fn run(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load()?;
    if let Some(port) = port {
        config.gateway.port = port;
    }

    info!(
        model = %config.provider.model,
        database = %config.database.url,
        "Starting apotheca"
    );
    apotheca_gateway::start(config).await
}
