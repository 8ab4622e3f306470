//! Block validation
//!
//! Pure functions over a read-only `ChainView`. Full validation runs
//! header, context, size and transaction checks in that order and stops at
//! the first failure. Nothing here mutates the chain or searches for PoW.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use super::{pow, Block, BlockHeader, ChainParams, KeyImage, Transaction};
use crate::crypto::Hash;
use crate::ChainError;

/// External pass/fail check for transaction-internal cryptography
/// (ring signatures, range proofs, commitments).
pub trait TxVerifier: Send + Sync {
    fn verify(&self, tx: &Transaction) -> Result<(), String>;
}

/// Accepts every transaction. For nodes that verify transaction
/// cryptography before handing blocks to the core.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveVerifier;

impl TxVerifier for PermissiveVerifier {
    fn verify(&self, _tx: &Transaction) -> Result<(), String> {
        Ok(())
    }
}

/// Read-only view of the chain needed to validate a block
pub trait ChainView {
    fn params(&self) -> &ChainParams;

    fn verifier(&self) -> &dyn TxVerifier;

    /// Header of any known block, canonical or side chain
    fn header(&self, hash: &Hash) -> Result<Option<BlockHeader>, ChainError>;

    /// Whether the key image is in the canonical spent-set
    fn is_key_image_spent(&self, key_image: &KeyImage) -> Result<bool, ChainError>;

    /// Difficulty a child of `parent` must be mined at
    fn required_difficulty(&self, parent: &BlockHeader) -> Result<u64, ChainError>;
}

/// Seconds since the Unix epoch by the local clock
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Validate header well-formedness and proof of work against the local clock
pub fn validate_header(
    header: &BlockHeader,
    required_difficulty: u64,
    params: &ChainParams,
) -> Result<(), ChainError> {
    validate_header_at(header, required_difficulty, params, unix_now())
}

/// Validate a header as if the local clock read `now`
pub fn validate_header_at(
    header: &BlockHeader,
    required_difficulty: u64,
    params: &ChainParams,
    now: u64,
) -> Result<(), ChainError> {
    if required_difficulty == 0 {
        return Err(ChainError::InvalidArgument("required difficulty is zero".into()));
    }
    if header.version != params.version {
        return Err(ChainError::invalid_block(format!("unknown version {}", header.version)));
    }
    if header.timestamp > now.saturating_add(params.max_future_skew) {
        return Err(ChainError::invalid_block(format!(
            "timestamp {} too far ahead of local time {}",
            header.timestamp, now
        )));
    }
    if header.difficulty != required_difficulty {
        return Err(ChainError::invalid_block(format!(
            "difficulty {} does not match required {}",
            header.difficulty, required_difficulty
        )));
    }
    if !pow::verify_pow(header, required_difficulty) {
        return Err(ChainError::InvalidPoW);
    }
    Ok(())
}

/// Check linkage to a known parent. Returns the parent header.
pub fn validate_context<C: ChainView + ?Sized>(
    chain: &C,
    block: &Block,
) -> Result<BlockHeader, ChainError> {
    let parent = chain.header(block.prev_hash())?.ok_or(ChainError::OrphanBlock)?;
    check_linkage(&parent, &block.header)?;
    Ok(parent)
}

fn check_linkage(parent: &BlockHeader, header: &BlockHeader) -> Result<(), ChainError> {
    if header.height != parent.height + 1 {
        return Err(ChainError::invalid_block(format!(
            "height {} does not follow parent height {}",
            header.height, parent.height
        )));
    }
    if header.timestamp <= parent.timestamp {
        return Err(ChainError::invalid_block(format!(
            "timestamp {} not after parent timestamp {}",
            header.timestamp, parent.timestamp
        )));
    }
    Ok(())
}

pub fn validate_size(block: &Block, params: &ChainParams) -> Result<(), ChainError> {
    let size = block.size();
    if size > params.max_block_size {
        return Err(ChainError::invalid_block(format!(
            "size {} exceeds maximum {}",
            size, params.max_block_size
        )));
    }
    Ok(())
}

/// Validate the coinbase and every transaction against the canonical spent-set
pub fn validate_transactions<C: ChainView + ?Sized>(
    chain: &C,
    block: &Block,
) -> Result<(), ChainError> {
    check_transactions(block, chain.params(), chain.verifier(), |ki| {
        chain.is_key_image_spent(ki)
    })
}

/// Transaction rules with a caller-supplied spent-set lookup.
///
/// Key images are checked in block order; the first one already spent, or
/// already seen earlier in the block, is reported as `DoubleSpend`.
pub fn check_transactions<F>(
    block: &Block,
    params: &ChainParams,
    verifier: &dyn TxVerifier,
    mut is_spent: F,
) -> Result<(), ChainError>
where
    F: FnMut(&KeyImage) -> Result<bool, ChainError>,
{
    if block.header.merkle_root != block.compute_merkle_root() {
        return Err(ChainError::invalid_block("merkle root mismatch"));
    }

    let height = block.height();
    if block.coinbase.height != height {
        return Err(ChainError::invalid_block(format!(
            "coinbase bound to height {} in block {}",
            block.coinbase.height, height
        )));
    }

    let fees = block
        .transactions
        .iter()
        .try_fold(0u64, |acc, tx| acc.checked_add(tx.fee))
        .ok_or_else(|| ChainError::invalid_block("fee total overflows"))?;
    let expected = params
        .block_reward(height)
        .checked_add(fees)
        .ok_or_else(|| ChainError::invalid_block("coinbase payout overflows"))?;
    if block.coinbase.amount != expected {
        return Err(ChainError::invalid_block(format!(
            "coinbase pays {} but reward plus fees is {}",
            block.coinbase.amount, expected
        )));
    }

    let mut seen = HashSet::new();
    for (index, tx) in block.transactions.iter().enumerate() {
        check_transaction(index, tx, verifier, &mut seen, &mut is_spent)?;
    }
    Ok(())
}

/// Check a single transaction against the canonical spent-set, as it would
/// be checked at position 0 of the next block
pub fn validate_transaction<C: ChainView + ?Sized>(
    chain: &C,
    tx: &Transaction,
) -> Result<(), ChainError> {
    let mut is_spent = |ki: &KeyImage| chain.is_key_image_spent(ki);
    check_transaction(0, tx, chain.verifier(), &mut HashSet::new(), &mut is_spent)
}

fn check_transaction<F>(
    index: usize,
    tx: &Transaction,
    verifier: &dyn TxVerifier,
    seen: &mut HashSet<KeyImage>,
    is_spent: &mut F,
) -> Result<(), ChainError>
where
    F: FnMut(&KeyImage) -> Result<bool, ChainError>,
{
    if tx.key_images.is_empty() {
        return Err(ChainError::InvalidTransaction {
            index,
            reason: "no key images".into(),
        });
    }
    verifier
        .verify(tx)
        .map_err(|reason| ChainError::InvalidTransaction { index, reason })?;

    for key_image in &tx.key_images {
        if !seen.insert(*key_image) || is_spent(key_image)? {
            return Err(ChainError::DoubleSpend {
                tx_index: index,
                key_image: *key_image,
            });
        }
    }
    Ok(())
}

/// Full validation of a block extending the canonical tip
pub fn validate_block<C: ChainView + ?Sized>(chain: &C, block: &Block) -> Result<(), ChainError> {
    validate_with(chain, block, |ki| chain.is_key_image_spent(ki))
}

/// Validation of a side-chain block. The canonical spent-set does not
/// describe the side chain, so key images are only checked within the block
/// here and again in full when the block is applied.
pub fn validate_side_block<C: ChainView + ?Sized>(
    chain: &C,
    block: &Block,
) -> Result<(), ChainError> {
    validate_with(chain, block, |_| Ok(false))
}

fn validate_with<C, F>(chain: &C, block: &Block, is_spent: F) -> Result<(), ChainError>
where
    C: ChainView + ?Sized,
    F: FnMut(&KeyImage) -> Result<bool, ChainError>,
{
    if !block.verify_hash() {
        return Err(ChainError::invalid_block("cached hash does not match header"));
    }

    let parent = chain.header(block.prev_hash())?;
    let required = match &parent {
        Some(parent) => chain.required_difficulty(parent)?,
        None => block.header.difficulty.max(1),
    };
    validate_header(&block.header, required, chain.params())?;

    let parent = parent.ok_or(ChainError::OrphanBlock)?;
    check_linkage(&parent, &block.header)?;
    validate_size(block, chain.params())?;
    check_transactions(block, chain.params(), chain.verifier(), is_spent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{create_genesis_block, CoinbaseTx};
    use std::collections::HashMap;

    struct TestChain {
        params: ChainParams,
        headers: HashMap<Hash, BlockHeader>,
        spent: HashSet<KeyImage>,
    }

    impl TestChain {
        fn new() -> (Self, Block) {
            let params = ChainParams::regtest();
            let genesis = create_genesis_block(&params);
            let mut headers = HashMap::new();
            headers.insert(genesis.hash(), genesis.header.clone());
            (Self { params, headers, spent: HashSet::new() }, genesis)
        }
    }

    impl ChainView for TestChain {
        fn params(&self) -> &ChainParams {
            &self.params
        }

        fn verifier(&self) -> &dyn TxVerifier {
            &PermissiveVerifier
        }

        fn header(&self, hash: &Hash) -> Result<Option<BlockHeader>, ChainError> {
            Ok(self.headers.get(hash).cloned())
        }

        fn is_key_image_spent(&self, key_image: &KeyImage) -> Result<bool, ChainError> {
            Ok(self.spent.contains(key_image))
        }

        fn required_difficulty(&self, parent: &BlockHeader) -> Result<u64, ChainError> {
            Ok(parent.difficulty)
        }
    }

    struct RejectFees;

    impl TxVerifier for RejectFees {
        fn verify(&self, tx: &Transaction) -> Result<(), String> {
            if tx.fee > 100 {
                return Err("fee too high".into());
            }
            Ok(())
        }
    }

    fn ki(byte: u8) -> KeyImage {
        KeyImage([byte; 32])
    }

    fn child(parent: &Block, params: &ChainParams, txs: Vec<Transaction>) -> Block {
        let height = parent.height() + 1;
        let fees: u64 = txs.iter().map(|tx| tx.fee).sum();
        let coinbase = CoinbaseTx::new(height, params.block_reward(height) + fees, vec![]);
        Block::assemble(
            parent.hash(),
            height,
            parent.header.timestamp + params.block_time_target,
            parent.header.difficulty,
            coinbase,
            txs,
        )
    }

    #[test]
    fn test_valid_child_accepted() {
        let (chain, genesis) = TestChain::new();
        let tx = Transaction::new(vec![ki(1)], 10, vec![]);
        let block = child(&genesis, &chain.params, vec![tx]);
        assert!(validate_block(&chain, &block).is_ok());
    }

    #[test]
    fn test_unknown_version_rejected() {
        let params = ChainParams::regtest();
        let mut header = create_genesis_block(&params).header;
        header.version = 9;
        let result = validate_header_at(&header, 1, &params, header.timestamp);
        assert!(matches!(result, Err(ChainError::InvalidBlock(_))));
    }

    #[test]
    fn test_future_timestamp_rejected() {
        let params = ChainParams::regtest();
        let header = create_genesis_block(&params).header;
        let now = header.timestamp - params.max_future_skew - 1;
        let result = validate_header_at(&header, 1, &params, now);
        assert!(matches!(result, Err(ChainError::InvalidBlock(_))));

        let now = header.timestamp - params.max_future_skew;
        assert!(validate_header_at(&header, 1, &params, now).is_ok());
    }

    #[test]
    fn test_zero_required_difficulty_is_invalid_argument() {
        let params = ChainParams::regtest();
        let header = create_genesis_block(&params).header;
        let result = validate_header_at(&header, 0, &params, header.timestamp);
        assert!(matches!(result, Err(ChainError::InvalidArgument(_))));
    }

    #[test]
    fn test_wrong_difficulty_rejected() {
        let (chain, genesis) = TestChain::new();
        let mut block = child(&genesis, &chain.params, vec![]);
        let mut header = block.header.clone();
        header.difficulty = 2;
        block = block.with_header(header);
        assert!(matches!(validate_block(&chain, &block), Err(ChainError::InvalidBlock(_))));
    }

    #[test]
    fn test_insufficient_work_rejected() {
        let params = ChainParams::regtest();
        let mut header = create_genesis_block(&params).header;
        header.difficulty = u64::MAX;
        let result = validate_header_at(&header, u64::MAX, &params, header.timestamp);
        assert!(matches!(result, Err(ChainError::InvalidPoW)));
    }

    #[test]
    fn test_orphan_detected() {
        let (chain, genesis) = TestChain::new();
        let mut block = child(&genesis, &chain.params, vec![]);
        let mut header = block.header.clone();
        header.prev_hash = Hash([9u8; 32]);
        block = block.with_header(header);
        assert!(matches!(validate_block(&chain, &block), Err(ChainError::OrphanBlock)));
        assert!(matches!(validate_context(&chain, &block), Err(ChainError::OrphanBlock)));
    }

    #[test]
    fn test_height_skip_rejected() {
        let (chain, genesis) = TestChain::new();
        let coinbase = CoinbaseTx::new(2, chain.params.block_reward(2), vec![]);
        let block = Block::assemble(genesis.hash(), 2, genesis.header.timestamp + 240, 1, coinbase, vec![]);
        assert!(matches!(validate_block(&chain, &block), Err(ChainError::InvalidBlock(_))));
    }

    #[test]
    fn test_non_increasing_timestamp_rejected() {
        let (chain, genesis) = TestChain::new();
        let coinbase = CoinbaseTx::new(1, chain.params.block_reward(1), vec![]);
        let block = Block::assemble(genesis.hash(), 1, genesis.header.timestamp, 1, coinbase, vec![]);
        assert!(matches!(validate_context(&chain, &block), Err(ChainError::InvalidBlock(_))));
    }

    #[test]
    fn test_oversized_block_rejected() {
        let (mut chain, genesis) = TestChain::new();
        chain.params.max_block_size = 256;
        let tx = Transaction::new(vec![ki(1)], 0, vec![0u8; 512]);
        let block = child(&genesis, &chain.params, vec![tx]);
        assert!(matches!(validate_size(&block, &chain.params), Err(ChainError::InvalidBlock(_))));
        assert!(matches!(validate_block(&chain, &block), Err(ChainError::InvalidBlock(_))));
    }

    #[test]
    fn test_coinbase_overpay_rejected() {
        let (chain, genesis) = TestChain::new();
        let mut block = child(&genesis, &chain.params, vec![]);
        block.coinbase.amount += 1;
        let root = block.compute_merkle_root();
        let mut header = block.header.clone();
        header.merkle_root = root;
        let block = block.with_header(header);
        assert!(matches!(validate_transactions(&chain, &block), Err(ChainError::InvalidBlock(_))));
    }

    #[test]
    fn test_merkle_mismatch_rejected() {
        let (chain, genesis) = TestChain::new();
        let mut block = child(&genesis, &chain.params, vec![]);
        block.coinbase.extra = b"changed".to_vec();
        assert!(matches!(validate_transactions(&chain, &block), Err(ChainError::InvalidBlock(_))));
    }

    #[test]
    fn test_transaction_without_key_images_rejected() {
        let (chain, genesis) = TestChain::new();
        let tx = Transaction::new(vec![], 0, vec![]);
        let block = child(&genesis, &chain.params, vec![tx]);
        assert!(matches!(
            validate_transactions(&chain, &block),
            Err(ChainError::InvalidTransaction { index: 0, .. })
        ));
    }

    #[test]
    fn test_verifier_rejection_reports_index() {
        let (chain, genesis) = TestChain::new();
        let txs = vec![
            Transaction::new(vec![ki(1)], 5, vec![]),
            Transaction::new(vec![ki(2)], 500, vec![]),
        ];
        let block = child(&genesis, &chain.params, txs);
        let result = check_transactions(&block, &chain.params, &RejectFees, |_| Ok(false));
        match result {
            Err(ChainError::InvalidTransaction { index, reason }) => {
                assert_eq!(index, 1);
                assert_eq!(reason, "fee too high");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_intra_block_double_spend() {
        let (chain, genesis) = TestChain::new();
        let txs = vec![
            Transaction::new(vec![ki(1)], 0, vec![]),
            Transaction::new(vec![ki(2), ki(1)], 0, vec![1]),
        ];
        let block = child(&genesis, &chain.params, txs);
        match validate_block(&chain, &block) {
            Err(ChainError::DoubleSpend { tx_index, key_image }) => {
                assert_eq!(tx_index, 1);
                assert_eq!(key_image, ki(1));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_chain_double_spend() {
        let (mut chain, genesis) = TestChain::new();
        chain.spent.insert(ki(7));
        let txs = vec![Transaction::new(vec![ki(7)], 0, vec![])];
        let block = child(&genesis, &chain.params, txs);
        assert!(matches!(
            validate_block(&chain, &block),
            Err(ChainError::DoubleSpend { tx_index: 0, .. })
        ));
        assert!(validate_side_block(&chain, &block).is_ok());
    }

    #[test]
    fn test_single_transaction_in_context() {
        let (mut chain, _) = TestChain::new();
        chain.spent.insert(ki(7));

        assert!(validate_transaction(&chain, &Transaction::new(vec![ki(1), ki(2)], 3, vec![])).is_ok());
        assert!(matches!(
            validate_transaction(&chain, &Transaction::new(vec![], 0, vec![])),
            Err(ChainError::InvalidTransaction { index: 0, .. })
        ));
        assert!(matches!(
            validate_transaction(&chain, &Transaction::new(vec![ki(1), ki(7)], 0, vec![])),
            Err(ChainError::DoubleSpend { tx_index: 0, key_image }) if key_image == ki(7)
        ));
        assert!(matches!(
            validate_transaction(&chain, &Transaction::new(vec![ki(3), ki(3)], 0, vec![])),
            Err(ChainError::DoubleSpend { .. })
        ));
    }
}
