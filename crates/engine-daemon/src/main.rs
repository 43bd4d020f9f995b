//! Engine Daemon
//!
//! Wires the execution engine against the paper-trading collaborators and
//! runs the monitoring and reconciliation loops until interrupted. Real
//! broker integrations plug in behind the same traits.

use std::sync::Arc;

use anyhow::Result;
use options_core::config::AppConfig;
use options_core::db::{self, MemoryOrderStore, PgOrderStore};
use options_core::traits::{Notifier, OrderStore};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trading_engine::{
    AlertPublisher, EngineService, EngineSettings, LogNotifier, PaperBroker, SimMarketData,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "engine_daemon=info,trading_engine=info,risk_manager=info,options_core=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting execution engine (paper mode)");

    let config = AppConfig::from_env()?;

    let market = Arc::new(SimMarketData::new());
    let broker = Arc::new(PaperBroker::new(market.clone()));

    let store: Arc<dyn OrderStore> = match &config.database {
        Some(database) => {
            let pool = db::create_pool(database).await?;
            info!("Using PostgreSQL order store");
            Arc::new(PgOrderStore::new(pool))
        }
        None => {
            info!("DATABASE_URL not set, using in-memory order store");
            Arc::new(MemoryOrderStore::new())
        }
    };

    let notifier: Arc<dyn Notifier> =
        match AlertPublisher::new(Some(&config.redis.url), config.alerts.clone()).await {
            Ok(publisher) => Arc::new(publisher),
            Err(e) => {
                warn!(error = %e, "Redis unavailable, alerts will only be logged");
                Arc::new(LogNotifier)
            }
        };

    let settings = EngineSettings::from_env(config.lot_size);
    let mut engine = EngineService::new(broker, market, store, notifier, settings);
    engine.start();

    info!("Engine running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutdown requested, letting loops finish their pass");
    engine.shutdown().await;
    Ok(())
}
