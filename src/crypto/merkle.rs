//! Merkle root over a block's transaction hashes

use super::{hash_pair, Hash};

/// Compute the merkle root of a list of hashes.
///
/// Empty input gives the zero hash; odd levels duplicate their last element.
pub fn compute_merkle_root(hashes: &[Hash]) -> Hash {
    match hashes {
        [] => Hash::zero(),
        [single] => *single,
        _ => {
            let mut level: Vec<Hash> = hashes.to_vec();
            while level.len() > 1 {
                if level.len() % 2 == 1 {
                    let last = level[level.len() - 1];
                    level.push(last);
                }
                level = level
                    .chunks(2)
                    .map(|pair| hash_pair(&pair[0], &pair[1]))
                    .collect();
            }
            level[0]
        }
    }
}
