//! Chain mutator
//!
//! `ChainCore` owns the chain state, the store and the pools. `apply` and
//! `rollback_tip` are the only operations that move the canonical tip; both
//! commit to the store first and update memory only after the commit
//! succeeded.

use parking_lot::Mutex;
use tracing::{debug, info};

use super::pools::{AltChains, OrphanPool, RejectedBlocks};
use crate::config::ChainConfig;
use crate::consensus::{
    calculate_next_difficulty, check_transactions, create_genesis_block, genesis_hash,
    get_period_start_height, should_adjust_difficulty, validate_size, Block, BlockHeader,
    ChainParams, ChainView, KeyImage, TxVerifier,
};
use crate::crypto::Hash;
use crate::storage::{BlockCache, BlockStore, ChainState, WriteBatch};
use crate::ChainError;

pub(crate) struct ChainCore<S> {
    pub(crate) store: S,
    pub(crate) config: ChainConfig,
    verifier: Box<dyn TxVerifier>,
    pub(crate) state: ChainState,
    cache: Mutex<BlockCache>,
    pub(crate) alt: AltChains,
    pub(crate) orphans: OrphanPool,
    pub(crate) rejected: RejectedBlocks,
}

impl<S: BlockStore> ChainCore<S> {
    pub(crate) fn new(store: S, config: ChainConfig, verifier: Box<dyn TxVerifier>) -> Self {
        Self {
            state: ChainState::empty(&config.params),
            cache: Mutex::new(BlockCache::new(config.cache_capacity)),
            alt: AltChains::new(config.max_side_blocks, config.max_side_depth),
            orphans: OrphanPool::new(config.max_orphans),
            rejected: RejectedBlocks::new(config.max_rejected),
            store,
            config,
            verifier,
        }
    }

    pub(crate) fn params(&self) -> &ChainParams {
        &self.config.params
    }

    /// Apply the genesis block to an empty data directory
    pub(crate) fn init_genesis(&mut self) -> Result<(), ChainError> {
        let genesis = create_genesis_block(&self.config.params);
        validate_size(&genesis, &self.config.params)?;
        check_transactions(&genesis, &self.config.params, self.verifier.as_ref(), |_| Ok(false))?;

        self.state = ChainState::empty(&self.config.params);
        self.apply(&genesis)?;
        info!(hash = %genesis.hash(), "initialized genesis block");
        Ok(())
    }

    /// Check a persisted state against the store and parameters
    pub(crate) fn check_resumed(&self) -> Result<(), ChainError> {
        let expected = genesis_hash(&self.config.params);
        match self.store.hash_at_height(0)? {
            Some(hash) if hash == expected => {}
            Some(hash) => {
                return Err(ChainError::Inconsistent(format!(
                    "stored genesis {} does not match {}",
                    hash, expected
                )))
            }
            None => return Err(ChainError::Inconsistent("stored chain has no genesis".into())),
        }

        if self.store.hash_at_height(self.state.height)? != Some(self.state.top_hash) {
            return Err(ChainError::Inconsistent(format!(
                "persisted tip {} is not indexed at height {}",
                self.state.top_hash, self.state.height
            )));
        }

        let issued = self.config.params.issued_through(self.state.height);
        if self.state.total_supply != issued {
            return Err(ChainError::Inconsistent(format!(
                "persisted supply {} differs from schedule {}",
                self.state.total_supply, issued
            )));
        }
        Ok(())
    }

    /// Canonical block at `height`, via the cache
    pub(crate) fn canonical_block(&self, height: u64) -> Result<Option<Block>, ChainError> {
        if self.state.is_empty() || height > self.state.height {
            return Ok(None);
        }
        if let Some(block) = self.cache.lock().get_by_height(height) {
            return Ok(Some(block));
        }
        let block = self.store.get_by_height(height)?;
        if let Some(block) = &block {
            self.cache.lock().insert_canonical(block.clone());
        }
        Ok(block)
    }

    pub(crate) fn canonical_hash(&self, height: u64) -> Result<Option<Hash>, ChainError> {
        if self.state.is_empty() || height > self.state.height {
            return Ok(None);
        }
        if let Some(block) = self.cache.lock().get_by_height(height) {
            return Ok(Some(block.hash()));
        }
        Ok(self.store.hash_at_height(height)?)
    }

    pub(crate) fn is_canonical(&self, hash: &Hash, height: u64) -> Result<bool, ChainError> {
        Ok(self.canonical_hash(height)? == Some(*hash))
    }

    /// Any known block: cache, then side-chain pool, then store
    pub(crate) fn find_block(&self, hash: &Hash) -> Result<Option<Block>, ChainError> {
        if let Some(block) = self.cache.lock().get_by_hash(hash) {
            return Ok(Some(block));
        }
        if let Some(block) = self.alt.get(hash) {
            return Ok(Some(block.clone()));
        }
        let block = self.store.get_by_hash(hash)?;
        if let Some(block) = &block {
            self.cache.lock().insert(block.clone());
        }
        Ok(block)
    }

    pub(crate) fn is_known(&self, hash: &Hash) -> Result<bool, ChainError> {
        Ok(self.alt.contains(hash) || self.store.has_block(hash)?)
    }

    pub(crate) fn parent_header(&self, header: &BlockHeader) -> Result<BlockHeader, ChainError> {
        self.find_block(&header.prev_hash)?
            .map(|block| block.header)
            .ok_or_else(|| {
                ChainError::Inconsistent(format!(
                    "parent {} of block at height {} is missing",
                    header.prev_hash, header.height
                ))
            })
    }

    /// Header at `height` on the branch ending at `from`. Jumps to the
    /// height index as soon as the walk reaches the canonical chain.
    pub(crate) fn ancestor_header(
        &self,
        from: &BlockHeader,
        height: u64,
    ) -> Result<BlockHeader, ChainError> {
        if height > from.height {
            return Err(ChainError::InvalidArgument(format!(
                "ancestor height {} above block height {}",
                height, from.height
            )));
        }
        let mut current = from.clone();
        while current.height > height {
            if self.is_canonical(&current.hash(), current.height)? {
                return self
                    .canonical_block(height)?
                    .map(|block| block.header)
                    .ok_or_else(|| {
                        ChainError::Inconsistent(format!("canonical block {} missing", height))
                    });
            }
            current = self.parent_header(&current)?;
        }
        Ok(current)
    }

    /// Difficulty required of a child of `parent`
    pub(crate) fn difficulty_after(&self, parent: &BlockHeader) -> Result<u64, ChainError> {
        let window = self.config.params.difficulty_window;
        if !should_adjust_difficulty(parent.height, window) {
            return Ok(parent.difficulty);
        }
        let first = self.ancestor_header(parent, get_period_start_height(parent.height, window))?;
        Ok(calculate_next_difficulty(
            parent.difficulty,
            first.timestamp,
            parent.timestamp,
            &self.config.params,
        ))
    }

    /// Make `block` the canonical tip. The caller has validated it.
    pub(crate) fn apply(&mut self, block: &Block) -> Result<(), ChainError> {
        let expected_height = if self.state.is_empty() {
            0
        } else {
            self.state.height + 1
        };
        if *block.prev_hash() != self.state.top_hash || block.height() != expected_height {
            return Err(ChainError::InvalidArgument(format!(
                "block {} at height {} does not extend tip {}",
                block.hash(),
                block.height(),
                self.state.top_hash
            )));
        }

        let reward = self.config.params.block_reward(block.height());
        let state = ChainState {
            height: block.height(),
            top_hash: block.hash(),
            difficulty: self.difficulty_after(&block.header)?,
            total_supply: self
                .state
                .total_supply
                .checked_add(reward)
                .ok_or_else(|| ChainError::Inconsistent("total supply overflows".into()))?,
            tx_count: self.state.tx_count.saturating_add(block.tx_count()),
        };

        self.store.commit(&WriteBatch::connect_block(block, state.clone()))?;

        self.state = state;
        self.cache.lock().insert_canonical(block.clone());
        debug!(height = block.height(), hash = %block.hash(), "applied block");
        Ok(())
    }

    /// Undo the canonical tip and return it. Genesis cannot be rolled back.
    pub(crate) fn rollback_tip(&mut self) -> Result<Block, ChainError> {
        if self.state.is_empty() || self.state.height == 0 {
            return Err(ChainError::InvalidArgument("cannot roll back genesis".into()));
        }
        let block = self
            .canonical_block(self.state.height)?
            .filter(|block| block.hash() == self.state.top_hash)
            .ok_or_else(|| {
                ChainError::Inconsistent(format!("tip {} not in store", self.state.top_hash))
            })?;
        let parent = self.parent_header(&block.header)?;

        let reward = self.config.params.block_reward(block.height());
        let parent_state = ChainState {
            height: parent.height,
            top_hash: block.header.prev_hash,
            difficulty: self.difficulty_after(&parent)?,
            total_supply: self
                .state
                .total_supply
                .checked_sub(reward)
                .ok_or_else(|| ChainError::Inconsistent("total supply underflows".into()))?,
            tx_count: self
                .state
                .tx_count
                .checked_sub(block.tx_count())
                .ok_or_else(|| ChainError::Inconsistent("transaction count underflows".into()))?,
        };

        self.store
            .commit(&WriteBatch::disconnect_block(&block, parent_state.clone()))?;

        self.state = parent_state;
        self.cache.lock().invalidate_height(block.height());
        debug!(height = block.height(), hash = %block.hash(), "rolled back block");
        Ok(block)
    }
}

impl<S: BlockStore> ChainView for ChainCore<S> {
    fn params(&self) -> &ChainParams {
        &self.config.params
    }

    fn verifier(&self) -> &dyn TxVerifier {
        self.verifier.as_ref()
    }

    fn header(&self, hash: &Hash) -> Result<Option<BlockHeader>, ChainError> {
        Ok(self.find_block(hash)?.map(|block| block.header))
    }

    fn is_key_image_spent(&self, key_image: &KeyImage) -> Result<bool, ChainError> {
        Ok(self.store.has_key_image(key_image)?)
    }

    fn required_difficulty(&self, parent: &BlockHeader) -> Result<u64, ChainError> {
        self.difficulty_after(parent)
    }
}
