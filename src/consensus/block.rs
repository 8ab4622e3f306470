//! Block structure for the SHD chain
//!
//! Defines the block header, the coinbase, ordinary transactions and the
//! block itself. A block caches the hash of its header; the cache is
//! re-checked whenever a block comes back from storage.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::{compute_merkle_root, hash_bytes, Hash};

/// One-time spend marker. Each key image may appear at most once on the chain.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyImage(pub [u8; 32]);

impl KeyImage {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for KeyImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyImage({})", self.to_hex())
    }
}

impl fmt::Display for KeyImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Block header
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    /// Protocol version
    pub version: u32,
    /// Height of this block (genesis is 0)
    pub height: u64,
    /// Block timestamp (seconds since Unix epoch)
    pub timestamp: u64,
    /// Hash of the previous block, zero for genesis
    pub prev_hash: Hash,
    /// Merkle root over the coinbase and transaction hashes
    pub merkle_root: Hash,
    /// Nonce used for PoW
    pub nonce: u64,
    /// Difficulty the block was mined at (not part of the hash)
    pub difficulty: u64,
}

impl BlockHeader {
    pub fn new(
        version: u32,
        height: u64,
        timestamp: u64,
        prev_hash: Hash,
        merkle_root: Hash,
        nonce: u64,
        difficulty: u64,
    ) -> Self {
        Self {
            version,
            height,
            timestamp,
            prev_hash,
            merkle_root,
            nonce,
            difficulty,
        }
    }

    /// Serialize the hashed fields. Difficulty is deliberately left out.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + 8 + 8 + 32 + 32 + 8);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&self.height.to_le_bytes());
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&self.prev_hash.0);
        bytes.extend_from_slice(&self.merkle_root.0);
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes
    }

    pub fn hash(&self) -> Hash {
        hash_header(self)
    }

    pub fn is_genesis(&self) -> bool {
        self.height == 0 && self.prev_hash.is_zero()
    }
}

/// Deterministic header digest, shared by block identity and PoW
pub fn hash_header(header: &BlockHeader) -> Hash {
    hash_bytes(&header.to_bytes())
}

/// The miner transaction minting the block reward plus fees
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoinbaseTx {
    /// Height this coinbase is bound to
    pub height: u64,
    /// Total payout in atomic units
    pub amount: u64,
    /// Opaque miner data (payout keys, extra nonce)
    pub extra: Vec<u8>,
}

impl CoinbaseTx {
    pub fn new(height: u64, amount: u64, extra: Vec<u8>) -> Self {
        Self { height, amount, extra }
    }

    pub fn hash(&self) -> Hash {
        let mut bytes = Vec::with_capacity(8 + 8 + 4 + self.extra.len());
        bytes.extend_from_slice(b"cb");
        bytes.extend_from_slice(&self.height.to_le_bytes());
        bytes.extend_from_slice(&self.amount.to_le_bytes());
        bytes.extend_from_slice(&(self.extra.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&self.extra);
        hash_bytes(&bytes)
    }
}

/// An ordinary transaction.
///
/// The core sees only the identity, the key images and the declared fee.
/// `payload` carries signatures and proofs for the external verifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub key_images: Vec<KeyImage>,
    pub fee: u64,
    pub payload: Vec<u8>,
}

impl Transaction {
    pub fn new(key_images: Vec<KeyImage>, fee: u64, payload: Vec<u8>) -> Self {
        Self {
            version: 1,
            key_images,
            fee,
            payload,
        }
    }

    pub fn hash(&self) -> Hash {
        let mut bytes = Vec::with_capacity(4 + 4 + self.key_images.len() * 32 + 8 + self.payload.len());
        bytes.extend_from_slice(b"tx");
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&(self.key_images.len() as u32).to_le_bytes());
        for key_image in &self.key_images {
            bytes.extend_from_slice(&key_image.0);
        }
        bytes.extend_from_slice(&self.fee.to_le_bytes());
        bytes.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&self.payload);
        hash_bytes(&bytes)
    }
}

/// A complete block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub coinbase: CoinbaseTx,
    /// Order matters: it is the order key images are checked and recorded in
    pub transactions: Vec<Transaction>,
    hash: Hash,
}

impl Block {
    /// Build a block and cache its header hash
    pub fn new(header: BlockHeader, coinbase: CoinbaseTx, transactions: Vec<Transaction>) -> Self {
        let hash = header.hash();
        Self {
            header,
            coinbase,
            transactions,
            hash,
        }
    }

    /// Build an unsolved block whose header commits to the given transactions
    pub fn assemble(
        prev_hash: Hash,
        height: u64,
        timestamp: u64,
        difficulty: u64,
        coinbase: CoinbaseTx,
        transactions: Vec<Transaction>,
    ) -> Self {
        let merkle_root = transactions_root(&coinbase, &transactions);
        let header = BlockHeader::new(
            crate::constants::PROTOCOL_VERSION,
            height,
            timestamp,
            prev_hash,
            merkle_root,
            0,
            difficulty,
        );
        Self::new(header, coinbase, transactions)
    }

    /// Replace the header (e.g. after a nonce search) and recompute the hash
    pub fn with_header(mut self, header: BlockHeader) -> Self {
        self.hash = header.hash();
        self.header = header;
        self
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn prev_hash(&self) -> &Hash {
        &self.header.prev_hash
    }

    pub fn is_genesis(&self) -> bool {
        self.header.is_genesis()
    }

    /// True when the cached hash still matches the header
    pub fn verify_hash(&self) -> bool {
        self.hash == self.header.hash()
    }

    pub fn compute_merkle_root(&self) -> Hash {
        transactions_root(&self.coinbase, &self.transactions)
    }

    /// Coinbase plus ordinary transactions
    pub fn tx_count(&self) -> u64 {
        self.transactions.len() as u64 + 1
    }

    /// Every key image spent by this block, in block order
    pub fn key_images(&self) -> impl Iterator<Item = &KeyImage> {
        self.transactions.iter().flat_map(|tx| tx.key_images.iter())
    }

    /// Serialized size in bytes
    pub fn size(&self) -> usize {
        bincode::serialized_size(self).map(|s| s as usize).unwrap_or(usize::MAX)
    }
}

fn transactions_root(coinbase: &CoinbaseTx, transactions: &[Transaction]) -> Hash {
    let mut hashes = Vec::with_capacity(transactions.len() + 1);
    hashes.push(coinbase.hash());
    hashes.extend(transactions.iter().map(Transaction::hash));
    compute_merkle_root(&hashes)
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block #{} [{}] diff={} ts={} txs={}",
            self.header.height,
            self.hash.short(),
            self.header.difficulty,
            self.header.timestamp,
            self.tx_count(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> BlockHeader {
        BlockHeader::new(1, 5, 1234567890, Hash::zero(), Hash::zero(), 0, 1000)
    }

    #[test]
    fn test_block_header_serialization() {
        let bytes = sample_header().to_bytes();
        assert_eq!(bytes.len(), 4 + 8 + 8 + 32 + 32 + 8);
    }

    #[test]
    fn test_difficulty_not_hashed() {
        let a = sample_header();
        let mut b = a.clone();
        b.difficulty = 99;
        assert_eq!(a.hash(), b.hash());

        b.nonce = 1;
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_block_caches_header_hash() {
        let block = Block::new(sample_header(), CoinbaseTx::new(5, 10, vec![]), vec![]);
        assert_eq!(block.hash(), sample_header().hash());
        assert!(block.verify_hash());
    }

    #[test]
    fn test_tampered_header_detected() {
        let mut block = Block::new(sample_header(), CoinbaseTx::new(5, 10, vec![]), vec![]);
        block.header.timestamp += 1;
        assert!(!block.verify_hash());
    }

    #[test]
    fn test_assemble_commits_to_transactions() {
        let tx = Transaction::new(vec![KeyImage([7u8; 32])], 5, vec![1, 2, 3]);
        let block = Block::assemble(Hash::zero(), 1, 100, 1, CoinbaseTx::new(1, 15, vec![]), vec![tx]);
        assert_eq!(block.header.merkle_root, block.compute_merkle_root());
        assert_eq!(block.tx_count(), 2);
        assert_eq!(block.key_images().count(), 1);
    }

    #[test]
    fn test_transaction_hash_covers_key_images() {
        let a = Transaction::new(vec![KeyImage([1u8; 32])], 5, vec![]);
        let b = Transaction::new(vec![KeyImage([2u8; 32])], 5, vec![]);
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), a.clone().hash());
    }

    #[test]
    fn test_genesis_detection() {
        let mut header = sample_header();
        assert!(!header.is_genesis());
        header.height = 0;
        assert!(header.is_genesis());
    }
}
