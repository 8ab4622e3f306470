//! Block cache
//!
//! Bounded LRU window of recently used blocks, keyed by hash and, for
//! canonical blocks, by height. Consulted before the store; never a source
//! of consensus truth.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::consensus::Block;
use crate::crypto::Hash;

/// Default number of cached blocks
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

#[derive(Debug)]
pub struct BlockCache {
    /// `None` when caching is disabled
    blocks: Option<LruCache<Hash, Block>>,
    by_height: HashMap<u64, Hash>,
}

impl BlockCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            blocks: NonZeroUsize::new(capacity).map(LruCache::new),
            by_height: HashMap::new(),
        }
    }

    /// Cache a block reachable by hash only
    pub fn insert(&mut self, block: Block) {
        let blocks = match self.blocks.as_mut() {
            Some(blocks) => blocks,
            None => return,
        };
        let hash = block.hash();
        if blocks.get(&hash).is_some() {
            return;
        }
        if let Some((evicted_hash, evicted)) = blocks.push(hash, block) {
            if self.by_height.get(&evicted.height()) == Some(&evicted_hash) {
                self.by_height.remove(&evicted.height());
            }
        }
    }

    /// Cache a canonical block, reachable by hash and height
    pub fn insert_canonical(&mut self, block: Block) {
        let (hash, height) = (block.hash(), block.height());
        self.insert(block);
        if self.contains(&hash) {
            self.by_height.insert(height, hash);
        }
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.blocks.as_ref().map_or(false, |blocks| blocks.contains(hash))
    }

    pub fn get_by_hash(&mut self, hash: &Hash) -> Option<Block> {
        self.blocks.as_mut()?.get(hash).cloned()
    }

    pub fn get_by_height(&mut self, height: u64) -> Option<Block> {
        let hash = *self.by_height.get(&height)?;
        self.get_by_hash(&hash)
    }

    /// Forget the canonical block at `height`. The block stays reachable by hash.
    pub fn invalidate_height(&mut self, height: u64) {
        self.by_height.remove(&height);
    }

    pub fn len(&self) -> usize {
        self.blocks.as_ref().map_or(0, LruCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        if let Some(blocks) = self.blocks.as_mut() {
            blocks.clear();
        }
        self.by_height.clear();
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::CoinbaseTx;

    fn block(height: u64, nonce_tag: u8) -> Block {
        Block::assemble(
            Hash([nonce_tag; 32]),
            height,
            1_704_067_200 + height,
            1,
            CoinbaseTx::new(height, 0, vec![]),
            vec![],
        )
    }

    #[test]
    fn test_least_recently_used_evicted() {
        let mut cache = BlockCache::new(2);
        let (a, b, c) = (block(1, 1), block(2, 1), block(3, 1));
        cache.insert_canonical(a.clone());
        cache.insert_canonical(b.clone());
        assert!(cache.get_by_height(1).is_some());
        cache.insert_canonical(c.clone());

        assert_eq!(cache.len(), 2);
        assert!(cache.get_by_hash(&b.hash()).is_none());
        assert!(cache.get_by_height(2).is_none());
        assert_eq!(cache.get_by_height(1), Some(a));
        assert_eq!(cache.get_by_height(3).map(|b| b.hash()), Some(c.hash()));
    }

    #[test]
    fn test_clear_drops_both_indexes() {
        let mut cache = BlockCache::new(4);
        cache.insert_canonical(block(1, 1));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get_by_height(1).is_none());
    }

    #[test]
    fn test_reinsert_does_not_duplicate() {
        let mut cache = BlockCache::new(2);
        let a = block(1, 1);
        cache.insert(a.clone());
        cache.insert_canonical(a.clone());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_by_height(1).map(|b| b.hash()), Some(a.hash()));
    }

    #[test]
    fn test_invalidate_height_keeps_hash() {
        let mut cache = BlockCache::default();
        let a = block(4, 1);
        cache.insert_canonical(a.clone());
        cache.invalidate_height(4);
        assert!(cache.get_by_height(4).is_none());
        assert!(cache.get_by_hash(&a.hash()).is_some());
    }

    #[test]
    fn test_eviction_keeps_newer_height_entry() {
        let mut cache = BlockCache::new(2);
        let old = block(5, 1);
        let new = block(5, 2);
        cache.insert_canonical(old.clone());
        cache.invalidate_height(5);
        cache.insert_canonical(new.clone());
        cache.insert_canonical(block(6, 1));
        assert!(cache.get_by_hash(&old.hash()).is_none());
        assert_eq!(cache.get_by_height(5).map(|b| b.hash()), Some(new.hash()));
    }

    #[test]
    fn test_zero_capacity_caches_nothing() {
        let mut cache = BlockCache::new(0);
        cache.insert_canonical(block(1, 1));
        assert!(cache.is_empty());
    }
}
