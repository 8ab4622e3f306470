//! Fork choice and reorganization
//!
//! A side chain is promoted only when its (work, length) above the fork is
//! strictly greater than the canonical chain's. Work is the sum of header
//! difficulties. Reorganization is all-or-nothing: on failure the original
//! canonical blocks are re-applied before the error is returned.

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::mutator::ChainCore;
use crate::consensus::{validate_block, Block};
use crate::crypto::Hash;
use crate::storage::BlockStore;
use crate::ChainError;

/// Result of a successful reorganization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorgSummary {
    pub fork_height: u64,
    /// Canonical blocks disconnected
    pub rolled_back: usize,
    /// Side-chain blocks connected
    pub applied: usize,
    pub new_height: u64,
    pub new_tip: Hash,
}

/// Cumulative (work, length) of a run of blocks
fn chain_strength<'a>(blocks: impl Iterator<Item = &'a Block>) -> (u128, u64) {
    blocks.fold((0u128, 0u64), |(work, len), block| {
        (work + block.header.difficulty as u128, len + 1)
    })
}

impl<S: BlockStore> ChainCore<S> {
    /// Last block shared by the branches ending at `a` and `b`
    pub(crate) fn find_common_ancestor(&self, a: &Hash, b: &Hash) -> Result<(Hash, u64), ChainError> {
        let missing = |hash: &Hash| ChainError::Inconsistent(format!("block {} is unknown", hash));
        let mut left = self.find_block(a)?.ok_or_else(|| missing(a))?.header;
        let mut right = self.find_block(b)?.ok_or_else(|| missing(b))?.header;

        while left.height > right.height {
            left = self.parent_header(&left)?;
        }
        while right.height > left.height {
            right = self.parent_header(&right)?;
        }
        loop {
            let hash = left.hash();
            if hash == right.hash() {
                return Ok((hash, left.height));
            }
            if left.height == 0 {
                return Err(ChainError::Inconsistent(format!(
                    "branches ending at {} and {} share no ancestor",
                    a, b
                )));
            }
            left = self.parent_header(&left)?;
            right = self.parent_header(&right)?;
        }
    }

    /// Blocks above `fork_height` on the branch ending at `tip`, ascending
    fn branch_above(&self, tip: &Hash, fork_height: u64) -> Result<Vec<Block>, ChainError> {
        let mut branch = Vec::new();
        let mut current = self
            .find_block(tip)?
            .ok_or_else(|| ChainError::Inconsistent(format!("block {} is unknown", tip)))?;
        while current.height() > fork_height {
            let prev = *current.prev_hash();
            branch.push(current);
            current = self.find_block(&prev)?.ok_or_else(|| {
                ChainError::Inconsistent(format!("side-chain parent {} is missing", prev))
            })?;
        }
        branch.reverse();
        Ok(branch)
    }

    /// Reorganize onto the branch ending at `tip` if it is strictly stronger
    pub(crate) fn try_promote(&mut self, tip: &Hash) -> Result<Option<ReorgSummary>, ChainError> {
        let top = self.state.top_hash;
        let (_, fork_height) = self.find_common_ancestor(&top, tip)?;
        let side = self.branch_above(tip, fork_height)?;

        let mut canonical = Vec::new();
        for height in fork_height + 1..=self.state.height {
            let block = self.canonical_block(height)?.ok_or_else(|| {
                ChainError::Inconsistent(format!("canonical block {} missing", height))
            })?;
            canonical.push(block);
        }

        let side_strength = chain_strength(side.iter());
        let canonical_strength = chain_strength(canonical.iter());
        if side_strength <= canonical_strength {
            return Ok(None);
        }
        info!(
            fork_height,
            side_work = side_strength.0,
            canonical_work = canonical_strength.0,
            "side chain overtakes canonical chain"
        );
        self.reorganize(fork_height, side).map(Some)
    }

    /// Replace the canonical blocks above `fork_height` with `blocks`
    pub(crate) fn reorganize(
        &mut self,
        fork_height: u64,
        blocks: Vec<Block>,
    ) -> Result<ReorgSummary, ChainError> {
        self.check_reorg_args(fork_height, &blocks)?;

        let mut rolled_back = Vec::new();
        while self.state.height > fork_height {
            match self.rollback_tip() {
                Ok(block) => rolled_back.push(block),
                Err(err) => {
                    warn!(error = %err, "rollback failed during reorganization");
                    self.restore(0, &rolled_back)?;
                    return Err(err);
                }
            }
        }

        for (applied, block) in blocks.iter().enumerate() {
            let result = validate_block(&*self, block).and_then(|_| self.apply(block));
            if let Err(err) = result {
                warn!(
                    height = block.height(),
                    hash = %block.hash(),
                    error = %err,
                    "side-chain block failed, restoring canonical chain"
                );
                self.restore(applied, &rolled_back)?;
                if err.is_permanent() {
                    self.reject_branch(block.hash(), &err);
                }
                return Err(err);
            }
        }

        for block in &blocks {
            self.alt.remove(&block.hash());
        }
        let summary = ReorgSummary {
            fork_height,
            rolled_back: rolled_back.len(),
            applied: blocks.len(),
            new_height: self.state.height,
            new_tip: self.state.top_hash,
        };
        for block in rolled_back {
            self.alt.readmit(block);
        }
        self.alt.prune(self.state.height);

        info!(
            fork_height,
            rolled_back = summary.rolled_back,
            applied = summary.applied,
            height = summary.new_height,
            "reorganized chain"
        );
        Ok(summary)
    }

    /// Forget a failed side block and everything built on it, and remember
    /// them as rejected
    fn reject_branch(&mut self, failed: Hash, err: &ChainError) {
        self.rejected.insert(failed, err);
        let descendant_err = ChainError::invalid_block(format!("descends from rejected block {}", failed));
        for hash in self.alt.remove_with_descendants(&failed) {
            self.rejected.insert(hash, &descendant_err);
        }
    }

    fn check_reorg_args(&self, fork_height: u64, blocks: &[Block]) -> Result<(), ChainError> {
        if self.state.is_empty() || fork_height > self.state.height {
            return Err(ChainError::InvalidArgument(format!(
                "fork height {} above tip {}",
                fork_height, self.state.height
            )));
        }
        let first = blocks
            .first()
            .ok_or_else(|| ChainError::InvalidArgument("no blocks to reorganize onto".into()))?;
        if self.canonical_hash(fork_height)? != Some(*first.prev_hash()) {
            return Err(ChainError::InvalidArgument(format!(
                "first block does not build on canonical block {}",
                fork_height
            )));
        }
        for (offset, block) in blocks.iter().enumerate() {
            if block.height() != fork_height + 1 + offset as u64 {
                return Err(ChainError::InvalidArgument(format!(
                    "block {} has height {}, expected {}",
                    offset,
                    block.height(),
                    fork_height + 1 + offset as u64
                )));
            }
        }
        for pair in blocks.windows(2) {
            if *pair[1].prev_hash() != pair[0].hash() {
                return Err(ChainError::InvalidArgument(format!(
                    "block at height {} does not build on its predecessor",
                    pair[1].height()
                )));
            }
        }
        Ok(())
    }

    /// Undo the `applied` side-chain blocks, then re-apply the original
    /// blocks (`rolled_back` is in descending height order).
    fn restore(&mut self, applied: usize, rolled_back: &[Block]) -> Result<(), ChainError> {
        self.reapply(applied, rolled_back).map_err(|err| {
            error!(error = %err, applied, "failed to restore canonical chain");
            ChainError::Inconsistent(format!("restore after failed reorganization: {}", err))
        })
    }

    fn reapply(&mut self, applied: usize, rolled_back: &[Block]) -> Result<(), ChainError> {
        for _ in 0..applied {
            self.rollback_tip()?;
        }
        for block in rolled_back.iter().rev() {
            self.apply(block)?;
        }
        Ok(())
    }
}
