//! Node and chain configuration
//!
//! `NodeConfig` is read from a JSON file; every field has a default so a
//! partial file is valid. Consensus constants are not configurable beyond
//! picking a parameter set.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consensus::ChainParams;
use crate::storage::DEFAULT_CACHE_CAPACITY;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Consensus parameter set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Regtest,
}

impl Network {
    pub fn params(self) -> ChainParams {
        match self {
            Network::Mainnet => ChainParams::mainnet(),
            Network::Regtest => ChainParams::regtest(),
        }
    }
}

/// Limits and parameters of an open chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub params: ChainParams,
    pub cache_capacity: usize,
    /// Side-chain blocks kept for possible reorganization
    pub max_side_blocks: usize,
    /// Side-chain blocks further than this below the tip are pruned
    pub max_side_depth: u64,
    pub max_orphans: usize,
    /// Permanently invalid block hashes remembered to short-circuit resubmission
    pub max_rejected: usize,
}

impl ChainConfig {
    pub fn new(params: ChainParams) -> Self {
        Self {
            params,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            max_side_blocks: 1024,
            max_side_depth: 720,
            max_orphans: 256,
            max_rejected: 1024,
        }
    }

    pub fn regtest() -> Self {
        Self::new(ChainParams::regtest())
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self::new(ChainParams::mainnet())
    }
}

/// Node configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub data_dir: PathBuf,
    pub network: Network,
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`
    pub log_filter: String,
    pub cache_capacity: usize,
    pub max_side_blocks: usize,
    pub max_side_depth: u64,
    pub max_orphans: usize,
    pub max_rejected: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let chain = ChainConfig::default();
        Self {
            data_dir: PathBuf::from("shd_data"),
            network: Network::Mainnet,
            log_filter: "info".to_string(),
            cache_capacity: chain.cache_capacity,
            max_side_blocks: chain.max_side_blocks,
            max_side_depth: chain.max_side_depth,
            max_orphans: chain.max_orphans,
            max_rejected: chain.max_rejected,
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            params: self.network.params(),
            cache_capacity: self.cache_capacity,
            max_side_blocks: self.max_side_blocks,
            max_side_depth: self.max_side_depth,
            max_orphans: self.max_orphans,
            max_rejected: self.max_rejected,
        }
    }
}
