//! Database persistence layer using Sled
//!
//! Trees:
//! - `blocks`: block hash -> bincode block (canonical and side chain)
//! - `main`: big-endian height -> canonical block hash
//! - `key_images`: spent key image -> empty
//! - `txs`: transaction hash -> bincode `TxLocation`
//! - `metadata`: chain state fields
//!
//! `commit` writes all five trees in one sled transaction and flushes before
//! returning.

use std::path::Path;

use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use tracing::debug;

use super::store::check_loaded;
use super::{BlockStore, ChainState, StoreError, TxLocation, WriteBatch};
use crate::consensus::{Block, KeyImage};
use crate::crypto::Hash;

const TIP_KEY: &str = "tip_hash";
const HEIGHT_KEY: &str = "height";
const DIFFICULTY_KEY: &str = "difficulty";
const SUPPLY_KEY: &str = "total_supply";
const TX_COUNT_KEY: &str = "tx_count";

/// Database wrapper
#[derive(Debug, Clone)]
pub struct SledStore {
    db: Db,
    blocks_tree: Tree,
    main_tree: Tree,
    key_images_tree: Tree,
    txs_tree: Tree,
    metadata_tree: Tree,
}

impl SledStore {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Wrap an already opened database
    pub fn from_db(db: Db) -> Result<Self, StoreError> {
        Ok(Self {
            blocks_tree: db.open_tree("blocks")?,
            main_tree: db.open_tree("main")?,
            key_images_tree: db.open_tree("key_images")?,
            txs_tree: db.open_tree("txs")?,
            metadata_tree: db.open_tree("metadata")?,
            db,
        })
    }

    fn read_u64(&self, key: &str) -> Result<Option<u64>, StoreError> {
        match self.metadata_tree.get(key)? {
            Some(bytes) => {
                let array = <[u8; 8]>::try_from(&bytes[..]).map_err(|_| {
                    StoreError::Corrupted(format!("metadata {} has {} bytes", key, bytes.len()))
                })?;
                Ok(Some(u64::from_le_bytes(array)))
            }
            None => Ok(None),
        }
    }
}

fn hash_from_bytes(bytes: &[u8]) -> Result<Hash, StoreError> {
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| StoreError::Corrupted(format!("hash has {} bytes", bytes.len())))?;
    Ok(Hash(array))
}

impl BlockStore for SledStore {
    fn get_by_hash(&self, hash: &Hash) -> Result<Option<Block>, StoreError> {
        match self.blocks_tree.get(hash.0)? {
            Some(bytes) => {
                let block: Block = bincode::deserialize(&bytes)?;
                check_loaded(hash, block).map(Some)
            }
            None => Ok(None),
        }
    }

    fn hash_at_height(&self, height: u64) -> Result<Option<Hash>, StoreError> {
        match self.main_tree.get(height.to_be_bytes())? {
            Some(bytes) => hash_from_bytes(&bytes).map(Some),
            None => Ok(None),
        }
    }

    fn has_block(&self, hash: &Hash) -> Result<bool, StoreError> {
        Ok(self.blocks_tree.contains_key(hash.0)?)
    }

    fn has_key_image(&self, key_image: &KeyImage) -> Result<bool, StoreError> {
        Ok(self.key_images_tree.contains_key(key_image.0)?)
    }

    fn commit(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let bodies = batch
            .blocks
            .iter()
            .map(|block| Ok((block.hash().0.to_vec(), bincode::serialize(block)?)))
            .collect::<Result<Vec<_>, StoreError>>()?;
        let locations = batch
            .index_txs
            .iter()
            .map(|(hash, location)| Ok((hash.0.to_vec(), bincode::serialize(location)?)))
            .collect::<Result<Vec<_>, StoreError>>()?;

        let result: Result<(), TransactionError<()>> = (
            &self.blocks_tree,
            &self.main_tree,
            &self.key_images_tree,
            &self.txs_tree,
            &self.metadata_tree,
        )
            .transaction(|(blocks, main, key_images, txs, metadata)| {
                for height in &batch.disconnect {
                    main.remove(height.to_be_bytes().to_vec())?;
                }
                for key_image in &batch.remove_key_images {
                    key_images.remove(key_image.0.to_vec())?;
                }
                for tx_hash in &batch.unindex_txs {
                    txs.remove(tx_hash.0.to_vec())?;
                }
                for (key, value) in &bodies {
                    blocks.insert(key.clone(), value.clone())?;
                }
                for (height, hash) in &batch.connect {
                    main.insert(height.to_be_bytes().to_vec(), hash.0.to_vec())?;
                }
                for key_image in &batch.add_key_images {
                    key_images.insert(key_image.0.to_vec(), Vec::new())?;
                }
                for (key, value) in &locations {
                    txs.insert(key.clone(), value.clone())?;
                }
                if let Some(state) = &batch.state {
                    metadata.insert(TIP_KEY.as_bytes(), state.top_hash.0.to_vec())?;
                    metadata.insert(HEIGHT_KEY.as_bytes(), state.height.to_le_bytes().to_vec())?;
                    metadata.insert(DIFFICULTY_KEY.as_bytes(), state.difficulty.to_le_bytes().to_vec())?;
                    metadata.insert(SUPPLY_KEY.as_bytes(), state.total_supply.to_le_bytes().to_vec())?;
                    metadata.insert(TX_COUNT_KEY.as_bytes(), state.tx_count.to_le_bytes().to_vec())?;
                }
                Ok::<(), ConflictableTransactionError<()>>(())
            });

        result.map_err(|e| match e {
            TransactionError::Storage(e) => StoreError::Database(e),
            TransactionError::Abort(()) => StoreError::Unavailable,
        })?;

        self.db.flush()?;
        debug!(
            blocks = batch.blocks.len(),
            connect = batch.connect.len(),
            disconnect = batch.disconnect.len(),
            key_images = batch.add_key_images.len() + batch.remove_key_images.len(),
            "committed write batch"
        );
        Ok(())
    }

    fn load_state(&self) -> Result<Option<ChainState>, StoreError> {
        let tip = match self.metadata_tree.get(TIP_KEY)? {
            Some(bytes) => hash_from_bytes(&bytes)?,
            None => return Ok(None),
        };
        let field = |key: &str| {
            self.read_u64(key)?
                .ok_or_else(|| StoreError::Corrupted(format!("metadata {} missing", key)))
        };
        Ok(Some(ChainState {
            height: field(HEIGHT_KEY)?,
            top_hash: tip,
            difficulty: field(DIFFICULTY_KEY)?,
            total_supply: field(SUPPLY_KEY)?,
            tx_count: field(TX_COUNT_KEY)?,
        }))
    }

    fn get_tx_location(&self, tx_hash: &Hash) -> Result<Option<TxLocation>, StoreError> {
        match self.txs_tree.get(tx_hash.0)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
