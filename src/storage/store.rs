//! Block store interface
//!
//! The chain core talks to persistence only through `BlockStore`. Every
//! apply and rollback is expressed as one `WriteBatch`, block body included,
//! so a crash leaves the store either before or after the step, never in
//! between.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{ChainState, StoreError};
use crate::consensus::{Block, KeyImage};
use crate::crypto::Hash;

/// Where a canonical transaction lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxLocation {
    pub block_hash: Hash,
    pub height: u64,
    /// Position among the block's ordinary transactions
    pub index: u32,
}

/// Effects committed atomically by `BlockStore::commit`.
///
/// Removals are applied before insertions.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    /// Block bodies stored by hash
    pub blocks: Vec<Block>,
    pub connect: Vec<(u64, Hash)>,
    pub disconnect: Vec<u64>,
    pub add_key_images: Vec<KeyImage>,
    pub remove_key_images: Vec<KeyImage>,
    pub index_txs: Vec<(Hash, TxLocation)>,
    pub unindex_txs: Vec<Hash>,
    pub state: Option<ChainState>,
}

impl WriteBatch {
    /// Effects of making `block` the canonical tip
    pub fn connect_block(block: &Block, state: ChainState) -> Self {
        let block_hash = block.hash();
        let height = block.height();
        Self {
            blocks: vec![block.clone()],
            connect: vec![(height, block_hash)],
            add_key_images: block.key_images().copied().collect(),
            index_txs: block
                .transactions
                .iter()
                .enumerate()
                .map(|(index, tx)| {
                    let location = TxLocation {
                        block_hash,
                        height,
                        index: index as u32,
                    };
                    (tx.hash(), location)
                })
                .collect(),
            state: Some(state),
            ..Default::default()
        }
    }

    /// Effects of removing the canonical tip `block`
    pub fn disconnect_block(block: &Block, parent_state: ChainState) -> Self {
        Self {
            disconnect: vec![block.height()],
            remove_key_images: block.key_images().copied().collect(),
            unindex_txs: block.transactions.iter().map(|tx| tx.hash()).collect(),
            state: Some(parent_state),
            ..Default::default()
        }
    }
}

/// Durable block storage with a canonical height index and a spent
/// key-image set.
///
/// Blocks are stored by hash whether or not they are canonical. Loads
/// recompute the header hash and report a mismatch as `Corrupted`.
pub trait BlockStore: Send + Sync {
    /// Store a block by hash without touching the canonical index.
    /// Durable before returning.
    fn put(&self, block: &Block) -> Result<(), StoreError> {
        self.commit(&WriteBatch {
            blocks: vec![block.clone()],
            ..Default::default()
        })
    }

    fn get_by_hash(&self, hash: &Hash) -> Result<Option<Block>, StoreError>;

    /// Hash of the canonical block at `height`
    fn hash_at_height(&self, height: u64) -> Result<Option<Hash>, StoreError>;

    /// Canonical block at `height`
    fn get_by_height(&self, height: u64) -> Result<Option<Block>, StoreError> {
        match self.hash_at_height(height)? {
            Some(hash) => {
                let block = self.get_by_hash(&hash)?.ok_or_else(|| {
                    StoreError::Corrupted(format!("height {} indexes missing block {}", height, hash))
                })?;
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    fn has_block(&self, hash: &Hash) -> Result<bool, StoreError>;

    fn has_key_image(&self, key_image: &KeyImage) -> Result<bool, StoreError>;

    fn record_key_images(&self, key_images: &[KeyImage]) -> Result<(), StoreError> {
        self.commit(&WriteBatch {
            add_key_images: key_images.to_vec(),
            ..Default::default()
        })
    }

    /// Apply every effect of the batch atomically. Durable before returning.
    fn commit(&self, batch: &WriteBatch) -> Result<(), StoreError>;

    fn load_state(&self) -> Result<Option<ChainState>, StoreError>;

    fn get_tx_location(&self, tx_hash: &Hash) -> Result<Option<TxLocation>, StoreError>;

    fn flush(&self) -> Result<(), StoreError>;
}

impl<S: BlockStore + ?Sized> BlockStore for Arc<S> {
    fn put(&self, block: &Block) -> Result<(), StoreError> {
        (**self).put(block)
    }

    fn get_by_hash(&self, hash: &Hash) -> Result<Option<Block>, StoreError> {
        (**self).get_by_hash(hash)
    }

    fn hash_at_height(&self, height: u64) -> Result<Option<Hash>, StoreError> {
        (**self).hash_at_height(height)
    }

    fn get_by_height(&self, height: u64) -> Result<Option<Block>, StoreError> {
        (**self).get_by_height(height)
    }

    fn has_block(&self, hash: &Hash) -> Result<bool, StoreError> {
        (**self).has_block(hash)
    }

    fn has_key_image(&self, key_image: &KeyImage) -> Result<bool, StoreError> {
        (**self).has_key_image(key_image)
    }

    fn record_key_images(&self, key_images: &[KeyImage]) -> Result<(), StoreError> {
        (**self).record_key_images(key_images)
    }

    fn commit(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        (**self).commit(batch)
    }

    fn load_state(&self) -> Result<Option<ChainState>, StoreError> {
        (**self).load_state()
    }

    fn get_tx_location(&self, tx_hash: &Hash) -> Result<Option<TxLocation>, StoreError> {
        (**self).get_tx_location(tx_hash)
    }

    fn flush(&self) -> Result<(), StoreError> {
        (**self).flush()
    }
}

/// Check a loaded block against the key it was stored under
pub(crate) fn check_loaded(hash: &Hash, block: Block) -> Result<Block, StoreError> {
    if !block.verify_hash() || block.hash() != *hash {
        return Err(StoreError::Corrupted(format!(
            "block stored under {} hashes to {}",
            hash,
            block.header.hash()
        )));
    }
    Ok(block)
}

#[derive(Debug, Default)]
struct MemoryInner {
    blocks: HashMap<Hash, Block>,
    main: BTreeMap<u64, Hash>,
    key_images: HashSet<KeyImage>,
    txs: HashMap<Hash, TxLocation>,
    state: Option<ChainState>,
}

/// Volatile store for tests and throwaway nodes
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blocks, canonical or not
    pub fn block_count(&self) -> usize {
        self.inner.read().blocks.len()
    }

    /// Number of recorded key images
    pub fn key_image_count(&self) -> usize {
        self.inner.read().key_images.len()
    }
}

impl BlockStore for MemoryStore {
    fn get_by_hash(&self, hash: &Hash) -> Result<Option<Block>, StoreError> {
        match self.inner.read().blocks.get(hash) {
            Some(block) => check_loaded(hash, block.clone()).map(Some),
            None => Ok(None),
        }
    }

    fn hash_at_height(&self, height: u64) -> Result<Option<Hash>, StoreError> {
        Ok(self.inner.read().main.get(&height).copied())
    }

    fn has_block(&self, hash: &Hash) -> Result<bool, StoreError> {
        Ok(self.inner.read().blocks.contains_key(hash))
    }

    fn has_key_image(&self, key_image: &KeyImage) -> Result<bool, StoreError> {
        Ok(self.inner.read().key_images.contains(key_image))
    }

    fn commit(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        for height in &batch.disconnect {
            inner.main.remove(height);
        }
        for key_image in &batch.remove_key_images {
            inner.key_images.remove(key_image);
        }
        for tx_hash in &batch.unindex_txs {
            inner.txs.remove(tx_hash);
        }
        for block in &batch.blocks {
            inner.blocks.insert(block.hash(), block.clone());
        }
        for (height, hash) in &batch.connect {
            inner.main.insert(*height, *hash);
        }
        inner.key_images.extend(batch.add_key_images.iter().copied());
        for (tx_hash, location) in &batch.index_txs {
            inner.txs.insert(*tx_hash, *location);
        }
        if let Some(state) = &batch.state {
            inner.state = Some(state.clone());
        }
        Ok(())
    }

    fn load_state(&self) -> Result<Option<ChainState>, StoreError> {
        Ok(self.inner.read().state.clone())
    }

    fn get_tx_location(&self, tx_hash: &Hash) -> Result<Option<TxLocation>, StoreError> {
        Ok(self.inner.read().txs.get(tx_hash).copied())
    }

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{create_genesis_block, ChainParams, CoinbaseTx, Transaction};

    fn block_with_tx() -> Block {
        let params = ChainParams::regtest();
        let genesis = create_genesis_block(&params);
        let tx = Transaction::new(vec![KeyImage([3u8; 32])], 1, vec![]);
        Block::assemble(
            genesis.hash(),
            1,
            genesis.header.timestamp + 120,
            1,
            CoinbaseTx::new(1, params.block_reward(1) + 1, vec![]),
            vec![tx],
        )
    }

    #[test]
    fn test_connect_then_disconnect() {
        let store = MemoryStore::new();
        let block = block_with_tx();
        let tx_hash = block.transactions[0].hash();
        let params = ChainParams::regtest();

        let mut state = ChainState::empty(&params);
        state.height = 1;
        state.top_hash = block.hash();
        store.commit(&WriteBatch::connect_block(&block, state.clone())).unwrap();

        assert_eq!(store.get_by_height(1).unwrap(), Some(block.clone()));
        assert!(store.has_key_image(&KeyImage([3u8; 32])).unwrap());
        assert_eq!(store.get_tx_location(&tx_hash).unwrap().map(|l| l.height), Some(1));
        assert_eq!(store.load_state().unwrap(), Some(state));

        let parent = ChainState::empty(&params);
        store.commit(&WriteBatch::disconnect_block(&block, parent.clone())).unwrap();
        assert!(store.get_by_height(1).unwrap().is_none());
        assert!(!store.has_key_image(&KeyImage([3u8; 32])).unwrap());
        assert!(store.get_tx_location(&tx_hash).unwrap().is_none());
        assert!(store.has_block(&block.hash()).unwrap());
        assert_eq!(store.load_state().unwrap(), Some(parent));
    }

    #[test]
    fn test_put_leaves_canonical_index_alone() {
        let store = MemoryStore::new();
        let block = block_with_tx();
        store.put(&block).unwrap();
        assert!(store.has_block(&block.hash()).unwrap());
        assert_eq!(store.get_by_hash(&block.hash()).unwrap(), Some(block));
        assert!(store.hash_at_height(1).unwrap().is_none());
        assert!(store.load_state().unwrap().is_none());
    }

    #[test]
    fn test_record_key_images() {
        let store = MemoryStore::new();
        store.record_key_images(&[KeyImage([1u8; 32]), KeyImage([2u8; 32])]).unwrap();
        assert_eq!(store.key_image_count(), 2);
        assert!(store.has_key_image(&KeyImage([2u8; 32])).unwrap());
    }

    #[test]
    fn test_tampered_block_is_corrupted() {
        let store = MemoryStore::new();
        let mut block = block_with_tx();
        let hash = block.hash();
        block.header.nonce += 1;
        store.inner.write().blocks.insert(hash, block);
        assert!(matches!(store.get_by_hash(&hash), Err(StoreError::Corrupted(_))));
    }
}
