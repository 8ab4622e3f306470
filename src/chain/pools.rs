//! Side-chain, orphan and rejected-block pools
//!
//! All pools are bounded and owned by the chain core, mutated only under
//! its write lock.

use std::collections::{HashMap, HashSet, VecDeque};
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::consensus::Block;
use crate::crypto::Hash;
use crate::ChainError;

/// Non-canonical blocks that descend from a known block
#[derive(Debug)]
pub struct AltChains {
    blocks: HashMap<Hash, Block>,
    capacity: usize,
    max_depth: u64,
}

impl AltChains {
    pub fn new(capacity: usize, max_depth: u64) -> Self {
        Self {
            blocks: HashMap::new(),
            capacity,
            max_depth,
        }
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&Block> {
        self.blocks.get(hash)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Admit a newly validated side-chain block
    pub fn insert(&mut self, block: Block, tip_height: u64) -> Result<(), ChainError> {
        self.prune(tip_height);
        if block.height().saturating_add(self.max_depth) < tip_height {
            return Err(ChainError::invalid_block(format!(
                "side-chain block at height {} is deeper than {} below tip {}",
                block.height(),
                self.max_depth,
                tip_height
            )));
        }
        if self.blocks.len() >= self.capacity {
            return Err(ChainError::ResourceExhausted(format!(
                "side-chain pool holds {} blocks",
                self.blocks.len()
            )));
        }
        self.blocks.insert(block.hash(), block);
        Ok(())
    }

    /// Keep a block that a reorganization just disconnected. Not bounded by
    /// capacity; the next prune trims it like any other side block.
    pub fn readmit(&mut self, block: Block) {
        self.blocks.insert(block.hash(), block);
    }

    pub fn remove(&mut self, hash: &Hash) -> Option<Block> {
        self.blocks.remove(hash)
    }

    /// Remove a block and every pooled block built on it. Returns the
    /// hashes of the removed descendants.
    pub fn remove_with_descendants(&mut self, hash: &Hash) -> Vec<Hash> {
        self.blocks.remove(hash);
        let mut root = HashSet::new();
        root.insert(*hash);
        let mut descendants: Vec<Hash> = self.cascade(root).into_iter().filter(|h| h != hash).collect();
        descendants.sort();
        descendants
    }

    /// Drop blocks more than `max_depth` below the tip, and their descendants
    pub fn prune(&mut self, tip_height: u64) -> usize {
        let max_depth = self.max_depth;
        let stale: HashSet<Hash> = self
            .blocks
            .values()
            .filter(|block| block.height().saturating_add(max_depth) < tip_height)
            .map(Block::hash)
            .collect();
        for hash in &stale {
            self.blocks.remove(hash);
        }
        self.cascade(stale).len()
    }

    fn cascade(&mut self, mut removed: HashSet<Hash>) -> HashSet<Hash> {
        let mut frontier: Vec<Hash> = removed.iter().copied().collect();
        while !frontier.is_empty() {
            let children: Vec<Hash> = self
                .blocks
                .values()
                .filter(|block| frontier.contains(block.prev_hash()))
                .map(Block::hash)
                .collect();
            for hash in &children {
                self.blocks.remove(hash);
                removed.insert(*hash);
            }
            frontier = children;
        }
        removed
    }
}

/// Blocks whose parent is unknown, oldest first
#[derive(Debug)]
pub struct OrphanPool {
    blocks: HashMap<Hash, Block>,
    order: VecDeque<Hash>,
    capacity: usize,
}

impl OrphanPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            blocks: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Buffer an orphan, evicting the oldest at capacity. Returns false if
    /// the block was already buffered or the pool is disabled.
    pub fn insert(&mut self, block: Block) -> bool {
        if self.capacity == 0 || self.blocks.contains_key(&block.hash()) {
            return false;
        }
        while self.blocks.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.blocks.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(block.hash());
        self.blocks.insert(block.hash(), block);
        true
    }

    /// Remove and return every orphan whose parent is `parent`, in arrival order
    pub fn take_children(&mut self, parent: &Hash) -> Vec<Block> {
        let blocks = &self.blocks;
        let children: Vec<Hash> = self
            .order
            .iter()
            .filter(|hash| blocks.get(*hash).map_or(false, |b| b.prev_hash() == parent))
            .copied()
            .collect();
        if children.is_empty() {
            return Vec::new();
        }
        self.order.retain(|hash| !children.contains(hash));
        children
            .iter()
            .filter_map(|hash| self.blocks.remove(hash))
            .collect()
    }
}

/// Recently rejected blocks and the permanent error each one failed with.
/// The least recently seen entry is evicted at capacity.
#[derive(Debug)]
pub struct RejectedBlocks {
    entries: Option<LruCache<Hash, ChainError>>,
}

impl RejectedBlocks {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(LruCache::new),
        }
    }

    /// Remember `hash` as rejected. Transient errors are not remembered.
    pub fn insert(&mut self, hash: Hash, err: &ChainError) {
        if let (Some(entries), Some(err)) = (self.entries.as_mut(), err.permanent_copy()) {
            entries.put(hash, err);
        }
    }

    /// The stored rejection for `hash`
    pub fn get(&mut self, hash: &Hash) -> Option<ChainError> {
        self.entries.as_mut()?.get(hash)?.permanent_copy()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.entries.as_ref().map_or(false, |entries| entries.contains(hash))
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, LruCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
