//! Proof-of-work target arithmetic
//!
//! A difficulty `d` maps to the target `floor((2^256 - 1) / d)`. A header
//! satisfies `d` when its digest, read as a big-endian 256-bit integer, is
//! strictly below that target.

use primitive_types::U256;

use super::{hash_header, BlockHeader};
use crate::crypto::Hash;

/// Target for a difficulty. `None` for the meaningless difficulty 0.
pub fn target(difficulty: u64) -> Option<U256> {
    if difficulty == 0 {
        return None;
    }
    Some(U256::MAX / U256::from(difficulty))
}

/// Compare a digest against the target for `difficulty`
pub fn hash_meets_target(hash: &Hash, difficulty: u64) -> bool {
    match target(difficulty) {
        Some(target) => U256::from_big_endian(hash.as_bytes()) < target,
        None => false,
    }
}

/// Check the header's PoW against `difficulty`
pub fn verify_pow(header: &BlockHeader, difficulty: u64) -> bool {
    hash_meets_target(&hash_header(header), difficulty)
}

/// Search nonces starting at `header.nonce` until the header satisfies its own
/// difficulty. Gives up after `max_attempts`.
pub fn solve(header: &BlockHeader, max_attempts: u64) -> Option<BlockHeader> {
    let mut candidate = header.clone();
    for _ in 0..max_attempts {
        if verify_pow(&candidate, candidate.difficulty) {
            return Some(candidate);
        }
        candidate.nonce = candidate.nonce.wrapping_add(1);
    }
    None
}
