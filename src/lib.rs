//! ShadowCoin (SHD) Chain Core Library
//!
//! Consensus core of the SHD proof-of-work chain: block validation,
//! difficulty retargeting, reward halving and chain reorganization
//! over a pluggable block store.

pub mod consensus;
pub mod crypto;
pub mod storage;
pub mod chain;
pub mod config;
mod error;

pub use error::ChainError;

/// Protocol constants - HARD-CODED, NEVER CONFIGURABLE
pub mod constants {
    /// Atomic units per coin (9 decimal places)
    pub const COIN: u64 = 1_000_000_000;

    /// Base block reward before any halving
    pub const BASE_BLOCK_REWARD: u64 = 20 * COIN;

    /// Blocks between reward halvings
    pub const HALVING_INTERVAL: u64 = 1_050_000;

    /// Halving count after which the reward is permanently zero
    pub const MAX_HALVINGS: u64 = 64;

    /// Target block time in seconds
    pub const BLOCK_TIME_TARGET: u64 = 120;

    /// Difficulty retarget window (blocks, ~1 day)
    pub const DIFFICULTY_WINDOW: u64 = 720;

    /// Difficulty of the genesis block and of every block before the first retarget
    pub const INITIAL_DIFFICULTY: u64 = 1_000_000;

    /// Difficulty floor
    pub const MIN_DIFFICULTY: u64 = 1;

    /// Maximum serialized block size in bytes (2 MB)
    pub const MAX_BLOCK_SIZE: usize = 2 * 1024 * 1024;

    /// How far ahead of the local clock a block timestamp may be (2 hours)
    pub const MAX_FUTURE_SKEW: u64 = 2 * 60 * 60;

    /// Header version accepted by this protocol
    pub const PROTOCOL_VERSION: u32 = 1;

    /// Genesis timestamp (2024-01-01 00:00:00 UTC)
    pub const GENESIS_TIMESTAMP: u64 = 1704067200;

    /// Chain name (short form)
    pub const CHAIN_NAME: &str = "SHD";

    /// Full chain name
    pub const CHAIN_FULL_NAME: &str = "ShadowCoin";
}
