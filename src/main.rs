use std::sync::Arc;

use ridecore::config::Config;
use ridecore::db::{MemoryStore, PgStore, Store};
use ridecore::engine::{spawn_dispatch_sweeper, Engine};
use ridecore::error::Error;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => Arc::new(PgStore::new(url, config.database_max_connections).await?),
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let engine = Arc::new(Engine::new(config, store)?);
    let sweeper = spawn_dispatch_sweeper(engine.clone());

    tracing::info!("ridecore running");

    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "could not listen for shutdown signal");
    }

    tracing::info!("shutting down");

    sweeper.abort();
    engine.shutdown();

    Ok(())
}
