//! Hop Bonder
//!
//! Runs the watcher fleet and the health server until interrupted.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use hop_bonder::{
    client, AccountQueue, BonderConfig, BridgeGateway, FleetOptions, HealthServer, HealthState,
    InMemoryStore, Settlement, SledStore, StateStore, WatcherFleet,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,hop_bonder=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_ansi(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Hop bonder starting");

    let config = BonderConfig::from_env()?;

    info!(
        chains = ?config.chains.keys().collect::<Vec<_>>(),
        token = %config.token,
        bonder = config.bonder_enabled,
        challenger = config.challenger_enabled,
        poll_interval = config.poll_interval_secs,
        health_port = config.health_port,
        "Configuration loaded"
    );

    let db = match &config.state_db_path {
        Some(path) => {
            info!(path = %path, "Opening state database");
            Some(SledStore::open(path)?)
        }
        None => None,
    };
    let store: Arc<dyn StateStore> = match &db {
        Some(db) => Arc::new(db.clone()),
        None => Arc::new(InMemoryStore::new()),
    };

    let mut gateways: Vec<Arc<dyn BridgeGateway>> = Vec::new();
    for chain in config.chains.values() {
        let gateway = client::connect(chain, &config.private_key)?;
        info!(
            chain = %chain.slug,
            chain_id = chain.chain_id,
            bridge = %chain.contracts.bridge(),
            identity = %gateway.identity(),
            "Chain gateway ready"
        );
        gateways.push(Arc::new(gateway));
    }

    let settlement = Arc::new(Settlement::new(
        gateways,
        AccountQueue::new(),
        config.token.clone(),
        config.send_deadline_secs,
    )?);

    for chain in settlement.chains() {
        match settlement.is_bonder(chain).await {
            Ok(true) => {}
            Ok(false) => warn!(%chain, "Identity is not a registered bonder"),
            Err(e) => warn!(%chain, error = %e, "Bonder registration check failed"),
        }
    }

    let fleet = WatcherFleet::build(
        Arc::clone(&settlement),
        Arc::clone(&store),
        &FleetOptions::from(&config),
    )?;

    let health_state = Arc::new(
        HealthState::new(Arc::clone(&store), fleet.watchers().to_vec())
            .with_book(settlement.book().clone()),
    );
    let health_server = HealthServer::new(health_state, config.health_port);

    fleet.start_all();

    tokio::select! {
        result = health_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "Health server failed");
                fleet.stop_all();
                fleet.join_all().await;
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    fleet.stop_all();
    fleet.join_all().await;

    if let Some(db) = &db {
        db.flush()?;
    }

    info!("Hop bonder stopped");
    Ok(())
}
