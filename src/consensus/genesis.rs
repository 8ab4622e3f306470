//! Genesis block generation for the SHD chain
//!
//! The genesis block is built from consensus parameters, never mined, and
//! mints the height-0 reward through an ordinary coinbase.

use super::{Block, ChainParams, CoinbaseTx};
use crate::crypto::Hash;

/// Message embedded in the genesis coinbase
pub const GENESIS_MESSAGE: &[u8] = b"ShadowCoin genesis 2024-01-01";

/// Create the genesis block
///
/// This function produces a reproducible, byte-for-byte identical genesis
/// block for a given parameter set.
pub fn create_genesis_block(params: &ChainParams) -> Block {
    let coinbase = CoinbaseTx::new(0, params.block_reward(0), GENESIS_MESSAGE.to_vec());
    Block::assemble(
        Hash::zero(),
        0,
        params.genesis_timestamp,
        params.initial_difficulty,
        coinbase,
        Vec::new(),
    )
}

/// Get genesis block hash for a parameter set
pub fn genesis_hash(params: &ChainParams) -> Hash {
    create_genesis_block(params).hash()
}
