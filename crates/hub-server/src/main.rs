//! Event hub server
//!
//! Loads the configuration, starts every bridge and runs the rules until
//! interrupted.
//!
//! The configuration path is the first argument, else `HUB_CONFIG`, else
//! `config.yaml`. Log filtering follows `RUST_LOG` and defaults to `info`.

use anyhow::{Context, Result};
use hub_actions::ActionFactory;
use hub_bridges::BridgeRegistry;
use hub_manager::EventManager;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "config.yaml";

fn config_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("HUB_CONFIG"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let path = config_path();
    info!(version = env!("CARGO_PKG_VERSION"), config = %path.display(), "Starting event hub");

    EventManager::start(
        &path,
        &BridgeRegistry::default(),
        &ActionFactory::new(),
        shutdown_signal(),
    )
    .await
    .with_context(|| format!("event hub failed with {}", path.display()))?;

    info!("Event hub stopped");
    Ok(())
}
