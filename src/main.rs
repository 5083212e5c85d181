use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use throttle_gate::clock::SystemClock;
use throttle_gate::config::Config;
use throttle_gate::handlers::AppState;
use throttle_gate::server::Server;
use throttle_gate::store::{EventStore, MemoryEventStore, RedisEventStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("throttle_gate={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate().context("Invalid configuration")?;
    let settings = config
        .load_settings()
        .context("Failed to load throttle settings")?;

    tracing::info!("Starting throttle gate");
    tracing::info!(
        bind_addr = %config.bind_addr,
        tiers = ?settings.tiers.as_slice(),
        routes = settings.routes.len(),
        failure_policy = ?settings.failure_policy,
        "Configuration loaded"
    );

    let ignored = settings.router_only_settings();
    if !ignored.is_empty() {
        tracing::warn!(
            settings = ?ignored,
            "Settings only apply to routers wrapped with throttled(); the decision API ignores them"
        );
    }

    let store: Arc<dyn EventStore> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisEventStore::connect(url, settings.redis_store_config())
                .await
                .context("Failed to connect event store")?,
        ),
        None => {
            tracing::warn!("REDIS_URL not set, using in-memory event store");
            Arc::new(MemoryEventStore::with_retention(settings.retention))
        }
    };

    let state = AppState::from_settings(&settings, store, Arc::new(SystemClock::new()))
        .context("Failed to build admission gate")?;

    Server::new(config.bind_addr, Arc::new(state))
        .run()
        .await
        .context("Server error")?;

    Ok(())
}
