//! Consensus parameters
//!
//! `ChainParams::mainnet()` mirrors the hard-coded protocol constants.
//! Other parameter sets exist for tests and private networks.

use serde::{Deserialize, Serialize};

use crate::constants::*;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    pub version: u32,
    pub block_time_target: u64,
    pub difficulty_window: u64,
    pub initial_difficulty: u64,
    pub min_difficulty: u64,
    pub max_block_size: usize,
    pub max_future_skew: u64,
    pub genesis_timestamp: u64,
    pub base_reward: u64,
    pub halving_interval: u64,
    pub max_halvings: u64,
}

impl ChainParams {
    pub const fn mainnet() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            block_time_target: BLOCK_TIME_TARGET,
            difficulty_window: DIFFICULTY_WINDOW,
            initial_difficulty: INITIAL_DIFFICULTY,
            min_difficulty: MIN_DIFFICULTY,
            max_block_size: MAX_BLOCK_SIZE,
            max_future_skew: MAX_FUTURE_SKEW,
            genesis_timestamp: GENESIS_TIMESTAMP,
            base_reward: BASE_BLOCK_REWARD,
            halving_interval: HALVING_INTERVAL,
            max_halvings: MAX_HALVINGS,
        }
    }

    /// Trivial difficulty and a short retarget window, for local testing
    pub const fn regtest() -> Self {
        Self {
            difficulty_window: 10,
            initial_difficulty: 1,
            min_difficulty: 1,
            halving_interval: 150,
            ..Self::mainnet()
        }
    }

    /// Expected wall-clock span of one retarget window
    pub fn expected_window_time(&self) -> u64 {
        self.difficulty_window.saturating_mul(self.block_time_target)
    }

    pub fn block_reward(&self, height: u64) -> u64 {
        super::reward_at(height, self.base_reward, self.halving_interval, self.max_halvings)
    }

    /// Supply minted by a chain whose tip is at `height`
    pub fn issued_through(&self, height: u64) -> u64 {
        super::issued_through(height, self.base_reward, self.halving_interval, self.max_halvings)
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self::mainnet()
    }
}
