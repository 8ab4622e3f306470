//! ShadowCoin (SHD) chain node
//!
//! Opens (or creates) the chain in the configured data directory, reports
//! its state and waits for Ctrl-C. Usage: `shd-node [config.json]`.

use std::path::PathBuf;

use shd_core::chain::Blockchain;
use shd_core::config::NodeConfig;
use shd_core::constants::{CHAIN_FULL_NAME, CHAIN_NAME, COIN};
use shd_core::storage::SledStore;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => NodeConfig::load(&path)?,
        None => NodeConfig::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("{} ({}) node starting", CHAIN_FULL_NAME, CHAIN_NAME);
    info!(data_dir = %config.data_dir.display(), network = ?config.network, "opening chain");

    let store = SledStore::open(&config.data_dir)?;
    let chain = Blockchain::open(store, config.chain_config())?;

    let stats = chain.stats();
    info!(
        height = stats.height,
        tip = %stats.top_hash,
        difficulty = stats.difficulty,
        hashrate = stats.hashrate,
        transactions = stats.tx_count,
        supply = stats.total_supply / COIN,
        "chain ready"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, flushing chain");
    if let Err(err) = chain.flush() {
        error!(error = %err, "flush failed");
        return Err(err.into());
    }
    Ok(())
}
