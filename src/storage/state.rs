//! Chain state management
//!
//! `ChainState` is the persisted summary of the canonical chain. It is
//! written in the same atomic commit as the block effects it describes and
//! read once at startup to resume.

use serde::{Deserialize, Serialize};

use crate::consensus::ChainParams;
use crate::crypto::Hash;

/// Summary of the canonical chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    /// Height of the tip (0 = genesis only)
    pub height: u64,
    /// Hash of the block at `height`, zero before genesis is applied
    pub top_hash: Hash,
    /// Difficulty required of the next block
    pub difficulty: u64,
    /// Sum of every reward minted so far
    pub total_supply: u64,
    /// Transactions on the chain, coinbases included
    pub tx_count: u64,
}

impl ChainState {
    /// State of a data directory before genesis is applied
    pub fn empty(params: &ChainParams) -> Self {
        Self {
            height: 0,
            top_hash: Hash::zero(),
            difficulty: params.initial_difficulty,
            total_supply: 0,
            tx_count: 0,
        }
    }

    /// True until the genesis block has been applied
    pub fn is_empty(&self) -> bool {
        self.top_hash.is_zero()
    }

    /// Get statistics about the chain state
    pub fn stats(&self, params: &ChainParams) -> ChainStats {
        ChainStats {
            height: self.height,
            top_hash: self.top_hash,
            tx_count: self.tx_count,
            total_supply: self.total_supply,
            difficulty: self.difficulty,
            hashrate: self.difficulty / params.block_time_target.max(1),
        }
    }
}

/// Statistics about the chain state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStats {
    pub height: u64,
    pub top_hash: Hash,
    pub tx_count: u64,
    pub total_supply: u64,
    pub difficulty: u64,
    /// Estimated network hashes per second
    pub hashrate: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_state() {
        let params = ChainParams::mainnet();
        let state = ChainState::empty(&params);
        assert!(state.is_empty());
        assert_eq!(state.height, 0);
        assert_eq!(state.difficulty, params.initial_difficulty);
    }

    #[test]
    fn test_hashrate_estimate() {
        let params = ChainParams::mainnet();
        let mut state = ChainState::empty(&params);
        state.difficulty = 1_200_000;
        assert_eq!(state.stats(&params).hashrate, 10_000);
    }
}
