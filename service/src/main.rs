//! RateSync Service Binary
//!
//! Imports daily exchange rate observations into the local rate store.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ratesync_fx::JsonFileProvider;
use ratesync_service::{RateSyncService, ServiceConfig};
use ratesync_store::Database;

fn init_tracing(config: &ServiceConfig) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
    );
    let registry = tracing_subscriber::registry().with(filter);

    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env();
    init_tracing(&config);

    info!("Starting RateSync");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let db = Database::connect(&config.database).await?;

    let provider = Arc::new(
        JsonFileProvider::new(config.import.provider_dir.clone())
            .with_name(config.import.provider_name.clone()),
    );
    info!(
        provider_dir = %config.import.provider_dir.display(),
        base_currency = %config.import.base_currency,
        "Provider configured"
    );

    let service = RateSyncService::new(config, db.clone(), provider)?;
    service.start().await?;

    let created = service.seed_series().await?;
    info!(created = created.len(), "Configured series registered");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    if let Err(e) = service.stop().await {
        error!(error = %e, "Error during shutdown");
    }
    db.close().await;

    info!("RateSync shutdown complete");
    Ok(())
}
