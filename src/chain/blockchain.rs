//! Shared chain handle
//!
//! `Blockchain` wraps the chain core in a single `RwLock`. Every mutation
//! holds the write lock for its whole duration, so two blocks can never both
//! be accepted on the same tip and readers never see a half-finished
//! reorganization.

use std::collections::VecDeque;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::mutator::ChainCore;
use super::reorg::ReorgSummary;
use crate::config::ChainConfig;
use crate::consensus::{
    median_timestamp, validate_block, validate_side_block, validate_transaction, Block,
    ChainParams, KeyImage, PermissiveVerifier, Transaction, TxVerifier,
};
use crate::crypto::Hash;
use crate::storage::{BlockStore, ChainState, ChainStats, TxLocation};
use crate::ChainError;

/// Where an accepted block ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockOutcome {
    /// Extended the canonical tip
    Connected { height: u64 },
    /// Stored as a side-chain candidate
    SideChain { height: u64 },
    /// Completed a side chain that replaced the canonical tail
    Reorganized(ReorgSummary),
}

pub struct Blockchain<S: BlockStore> {
    core: RwLock<ChainCore<S>>,
}

impl<S: BlockStore> Blockchain<S> {
    /// Open a chain over `store`, creating genesis on first use
    pub fn open(store: S, config: ChainConfig) -> Result<Self, ChainError> {
        Self::open_with_verifier(store, config, Box::new(PermissiveVerifier))
    }

    pub fn open_with_verifier(
        store: S,
        config: ChainConfig,
        verifier: Box<dyn TxVerifier>,
    ) -> Result<Self, ChainError> {
        let mut core = ChainCore::new(store, config, verifier);
        match core.store.load_state()? {
            Some(state) => {
                core.state = state;
                core.check_resumed()?;
                info!(
                    height = core.state.height,
                    tip = %core.state.top_hash,
                    "resumed chain state"
                );
            }
            None => core.init_genesis()?,
        }
        Ok(Self {
            core: RwLock::new(core),
        })
    }

    /// Submit a block. Buffered orphans waiting on it are retried afterwards.
    pub fn add_block(&self, block: Block) -> Result<BlockOutcome, ChainError> {
        let mut core = self.core.write();
        let hash = block.hash();
        let outcome = connect(&mut core, block)?;
        connect_orphans(&mut core, hash);
        Ok(outcome)
    }

    /// Full validation against the current tip, without applying
    pub fn validate_block(&self, block: &Block) -> Result<(), ChainError> {
        let core = self.core.read();
        validate_block(&*core, block)
    }

    /// Check a loose transaction against the canonical spent-set and the
    /// verifier, without applying it
    pub fn validate_transaction(&self, tx: &Transaction) -> Result<(), ChainError> {
        let core = self.core.read();
        validate_transaction(&*core, tx)
    }

    /// Replace the canonical blocks above `fork_height` with `blocks`.
    /// On failure the chain is left exactly as it was.
    pub fn reorganize(&self, fork_height: u64, blocks: Vec<Block>) -> Result<ReorgSummary, ChainError> {
        self.core.write().reorganize(fork_height, blocks)
    }

    /// Last block shared by the branches ending at `a` and `b`
    pub fn find_common_ancestor(&self, a: &Hash, b: &Hash) -> Result<(Hash, u64), ChainError> {
        self.core.read().find_common_ancestor(a, b)
    }

    pub fn height(&self) -> u64 {
        self.core.read().state.height
    }

    pub fn top_hash(&self) -> Hash {
        self.core.read().state.top_hash
    }

    /// Consistent snapshot of the chain state
    pub fn state(&self) -> ChainState {
        self.core.read().state.clone()
    }

    pub fn stats(&self) -> ChainStats {
        let core = self.core.read();
        core.state.stats(core.params())
    }

    pub fn params(&self) -> ChainParams {
        self.core.read().params().clone()
    }

    /// Difficulty required of the next block on the tip
    pub fn next_difficulty(&self) -> u64 {
        self.core.read().state.difficulty
    }

    pub fn block_reward(&self, height: u64) -> u64 {
        self.core.read().params().block_reward(height)
    }

    pub fn get_block_by_height(&self, height: u64) -> Result<Option<Block>, ChainError> {
        self.core.read().canonical_block(height)
    }

    /// Any known block, canonical or side chain
    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<Block>, ChainError> {
        self.core.read().find_block(hash)
    }

    pub fn has_block(&self, hash: &Hash) -> Result<bool, ChainError> {
        self.core.read().is_known(hash)
    }

    /// A canonical transaction and where it lives
    pub fn get_transaction(&self, tx_hash: &Hash) -> Result<Option<(Transaction, TxLocation)>, ChainError> {
        let core = self.core.read();
        let location = match core.store.get_tx_location(tx_hash)? {
            Some(location) => location,
            None => return Ok(None),
        };
        let tx = core
            .find_block(&location.block_hash)?
            .and_then(|block| block.transactions.get(location.index as usize).cloned())
            .filter(|tx| tx.hash() == *tx_hash)
            .ok_or_else(|| {
                ChainError::Inconsistent(format!(
                    "transaction {} indexed in block {} is missing",
                    tx_hash, location.block_hash
                ))
            })?;
        Ok(Some((tx, location)))
    }

    pub fn is_key_image_spent(&self, key_image: &KeyImage) -> Result<bool, ChainError> {
        Ok(self.core.read().store.has_key_image(key_image)?)
    }

    /// Median timestamp of the most recent `count` canonical blocks
    pub fn median_timestamp(&self, count: usize) -> Result<u64, ChainError> {
        if count == 0 {
            return Err(ChainError::InvalidArgument("median over zero blocks".into()));
        }
        let core = self.core.read();
        let available = core.state.height.saturating_add(1);
        let n = (count as u64).min(available);
        let mut timestamps = Vec::with_capacity(n as usize);
        for height in (core.state.height + 1 - n)..=core.state.height {
            let block = core.canonical_block(height)?.ok_or_else(|| {
                ChainError::Inconsistent(format!("canonical block {} missing", height))
            })?;
            timestamps.push(block.header.timestamp);
        }
        median_timestamp(&mut timestamps).ok_or(ChainError::NotFound)
    }

    /// Side-chain blocks held for possible reorganization
    pub fn side_chain_len(&self) -> usize {
        self.core.read().alt.len()
    }

    pub fn orphan_count(&self) -> usize {
        self.core.read().orphans.len()
    }

    /// Whether `hash` was rejected as permanently invalid
    pub fn is_rejected(&self, hash: &Hash) -> bool {
        self.core.read().rejected.contains(hash)
    }

    pub fn flush(&self) -> Result<(), ChainError> {
        Ok(self.core.read().store.flush()?)
    }
}

fn connect<S: BlockStore>(core: &mut ChainCore<S>, block: Block) -> Result<BlockOutcome, ChainError> {
    let hash = block.hash();
    if core.is_known(&hash)? {
        return Err(ChainError::DuplicateBlock);
    }
    if let Some(err) = core.rejected.get(&hash) {
        debug!(hash = %hash, error = %err, "resubmitted rejected block");
        return Err(err);
    }
    if core.rejected.contains(block.prev_hash()) {
        let err = ChainError::invalid_block(format!("parent {} was rejected", block.prev_hash()));
        core.rejected.insert(hash, &err);
        return Err(err);
    }

    if core.find_block(block.prev_hash())?.is_none() {
        let height = block.height();
        if core.orphans.insert(block) {
            debug!(height, hash = %hash, "buffered orphan block");
        }
        return Err(ChainError::OrphanBlock);
    }

    if *block.prev_hash() == core.state.top_hash {
        if let Err(err) = validate_block(&*core, &block) {
            warn!(hash = %hash, error = %err, "rejected block");
            return Err(err);
        }
        core.apply(&block)?;
        core.alt.prune(core.state.height);
        debug!(height = core.state.height, hash = %hash, "connected block");
        return Ok(BlockOutcome::Connected {
            height: core.state.height,
        });
    }

    if let Err(err) = validate_side_block(&*core, &block) {
        warn!(hash = %hash, error = %err, "rejected side-chain block");
        return Err(err);
    }
    let height = block.height();
    core.alt.insert(block, core.state.height)?;
    debug!(height, hash = %hash, "stored side-chain block");

    match core.try_promote(&hash)? {
        Some(summary) => Ok(BlockOutcome::Reorganized(summary)),
        None => Ok(BlockOutcome::SideChain { height }),
    }
}

/// Retry buffered orphans descending from `parent`, breadth first
fn connect_orphans<S: BlockStore>(core: &mut ChainCore<S>, parent: Hash) {
    let mut queue = VecDeque::from([parent]);
    while let Some(parent) = queue.pop_front() {
        for orphan in core.orphans.take_children(&parent) {
            let hash = orphan.hash();
            match connect(core, orphan) {
                Ok(outcome) => {
                    debug!(hash = %hash, ?outcome, "connected buffered orphan");
                    queue.push_back(hash);
                }
                Err(err) => warn!(hash = %hash, error = %err, "dropped buffered orphan"),
            }
        }
    }
}
