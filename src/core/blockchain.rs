//! The append-only ledger of block headers.

use crate::core::block::{Block, Header};
use crate::core::validator::{BlockValidator, BlockValidatorError, ChainView, Validator};
use crate::info;
use crate::storage::storage_trait::{Storage, StorageError};
use crate::types::hash::Hash;
use ledger_derive::Error;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockchainError {
    #[error("height {requested} is above the chain height {height}")]
    HeightTooHigh { requested: u32, height: u32 },
    #[error("genesis block must have height 0, got {0}")]
    InvalidGenesis(u32),
    #[error("{0}")]
    Validation(BlockValidatorError),
    #[error("storage failure: {0}")]
    Storage(StorageError),
}

impl From<BlockValidatorError> for BlockchainError {
    fn from(err: BlockValidatorError) -> Self {
        BlockchainError::Validation(err)
    }
}

impl From<StorageError> for BlockchainError {
    fn from(err: StorageError) -> Self {
        BlockchainError::Storage(err)
    }
}

/// Headers indexed by height, with `headers[i].height() == i`.
///
/// Genesis is installed without validation; every later block goes through
/// the validator, storage and the header list inside one write-locked
/// section, so readers never observe a header whose block was not stored.
pub struct Blockchain<S: Storage, V: Validator = BlockValidator> {
    headers: RwLock<Vec<Header>>,
    storage: S,
    validator: V,
}

impl<S: Storage> Blockchain<S> {
    /// Ledger with the default [`BlockValidator`].
    pub fn new(genesis: &Block, storage: S) -> Result<Self, BlockchainError> {
        Self::with_validator(genesis, storage, BlockValidator::new())
    }
}

impl<S: Storage, V: Validator> Blockchain<S, V> {
    /// Stores `genesis` and starts the header list with it.
    ///
    /// Genesis is not run through `validator`; it only has to sit at height zero.
    pub fn with_validator(genesis: &Block, storage: S, validator: V) -> Result<Self, BlockchainError> {
        if genesis.height() != 0 {
            return Err(BlockchainError::InvalidGenesis(genesis.height()));
        }
        storage.put(genesis)?;

        info!("ledger initialized with genesis block {}", genesis.hash());
        Ok(Self {
            headers: RwLock::new(vec![*genesis.header()]),
            storage,
            validator,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Header>> {
        self.headers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Header>> {
        self.headers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validates, stores and appends `block`, returning the new height.
    pub fn add_block(&self, block: &Block) -> Result<u32, BlockchainError> {
        let mut headers = self.write();

        self.validator.validate_block(ChainView::new(&headers), block)?;
        self.storage.put(block)?;
        headers.push(*block.header());

        info!(
            "adding a new block to the chain: height={} hash={} transactions={}",
            block.height(),
            block.hash(),
            block.transactions().len()
        );
        Ok(block.height())
    }

    /// Number of blocks minus one; genesis alone is height 0.
    pub fn height(&self) -> u32 {
        ChainView::new(&self.read()).height()
    }

    pub fn has_height(&self, height: u32) -> bool {
        height <= self.height()
    }

    /// Header at `height`, or [`BlockchainError::HeightTooHigh`] past the tip.
    pub fn get_header(&self, height: u32) -> Result<Header, BlockchainError> {
        let headers = self.read();
        let view = ChainView::new(&headers);
        view.get_header(height)
            .copied()
            .ok_or(BlockchainError::HeightTooHigh {
                requested: height,
                height: view.height(),
            })
    }

    pub fn get_block_hash(&self, height: u32) -> Result<Hash, BlockchainError> {
        self.get_header(height).map(|header| header.hash())
    }

    /// Header at the tip of the chain.
    pub fn current_header(&self) -> Header {
        let headers = self.read();
        // The list starts with genesis and never shrinks.
        headers[headers.len() - 1]
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn validator(&self) -> &V {
        &self.validator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::VerifyError;
    use crate::crypto::key_pair::PrivateKey;
    use crate::storage::memory_storage::MemoryStorage;
    use crate::utils::test_utils::utils::{block_after, genesis, signed_transaction_by};
    use std::sync::Arc;
    use std::thread;

    struct RejectingStorage;

    impl Storage for RejectingStorage {
        fn put(&self, _: &Block) -> Result<(), StorageError> {
            Err(StorageError::Backend("disk full".into()))
        }
    }

    /// Accepts genesis, refuses everything after it.
    struct GenesisOnlyStorage(MemoryStorage);

    impl Storage for GenesisOnlyStorage {
        fn put(&self, block: &Block) -> Result<(), StorageError> {
            if block.height() == 0 {
                self.0.put(block)
            } else {
                Err(StorageError::Backend("read-only".into()))
            }
        }
    }

    struct RejectAll;

    impl Validator for RejectAll {
        fn validate_block(&self, _: ChainView<'_>, _: &Block) -> Result<(), BlockValidatorError> {
            Err(BlockValidatorError::Rejected("closed".into()))
        }
    }

    fn new_chain(key: &PrivateKey) -> Blockchain<MemoryStorage> {
        Blockchain::new(&genesis(key), MemoryStorage::new()).unwrap()
    }

    #[test]
    fn genesis_only_chain_has_height_zero() {
        let key = PrivateKey::new();
        let genesis = genesis(&key);
        let chain = Blockchain::new(&genesis, MemoryStorage::new()).unwrap();

        assert_eq!(chain.height(), 0);
        assert!(chain.has_height(0));
        assert!(!chain.has_height(1));
        assert_eq!(chain.get_header(0).unwrap(), *genesis.header());
        assert_eq!(chain.storage().len(), 1);
    }

    #[test]
    fn genesis_bypasses_validation() {
        let unsigned = Block::genesis(42);
        let chain = Blockchain::with_validator(&unsigned, MemoryStorage::new(), RejectAll).unwrap();
        assert_eq!(chain.height(), 0);
    }

    #[test]
    fn genesis_must_be_height_zero() {
        let key = PrivateKey::new();
        let first = block_after(genesis(&key).header(), Vec::new(), &key);
        assert_eq!(
            Blockchain::new(&first, MemoryStorage::new()).err(),
            Some(BlockchainError::InvalidGenesis(1))
        );
    }

    #[test]
    fn storage_failure_on_genesis_is_fatal() {
        let key = PrivateKey::new();
        assert!(matches!(
            Blockchain::new(&genesis(&key), RejectingStorage),
            Err(BlockchainError::Storage(StorageError::Backend(_)))
        ));
    }

    #[test]
    fn add_block_then_re_add_fails() {
        let key = PrivateKey::new();
        let chain = new_chain(&key);
        let tx = signed_transaction_by(b"foo", &key);
        let block = block_after(&chain.current_header(), vec![tx], &key);

        assert_eq!(chain.add_block(&block), Ok(1));
        assert_eq!(chain.height(), 1);
        assert_eq!(
            chain.add_block(&block),
            Err(BlockchainError::Validation(
                BlockValidatorError::BlockAlreadyPresent {
                    height: 1,
                    current: 1
                }
            ))
        );
        assert_eq!(chain.height(), 1);
    }

    #[test]
    fn thousand_blocks() {
        let key = PrivateKey::new();
        let chain = new_chain(&key);
        let mut appended = Vec::new();

        for _ in 0..1000 {
            let block = block_after(&chain.current_header(), Vec::new(), &key);
            chain.add_block(&block).unwrap();
            appended.push(*block.header());
        }

        assert_eq!(chain.height(), 1000);
        assert_eq!(chain.storage().len(), 1001);
        for (i, header) in appended.iter().enumerate() {
            assert_eq!(chain.get_header(i as u32 + 1).unwrap(), *header);
        }
    }

    #[test]
    fn heights_beyond_next_are_mismatches() {
        let key = PrivateKey::new();
        let chain = new_chain(&key);
        let skipped = block_after(&chain.current_header(), Vec::new(), &key);
        let too_far = block_after(skipped.header(), Vec::new(), &key);

        assert_eq!(
            chain.add_block(&too_far),
            Err(BlockchainError::Validation(BlockValidatorError::HeightMismatch {
                expected: 1,
                actual: 2
            }))
        );
    }

    #[test]
    fn get_header_above_height_fails() {
        let key = PrivateKey::new();
        let chain = new_chain(&key);
        assert_eq!(
            chain.get_header(3),
            Err(BlockchainError::HeightTooHigh {
                requested: 3,
                height: 0
            })
        );
    }

    #[test]
    fn invalid_transaction_keeps_chain_unchanged() {
        let key = PrivateKey::new();
        let chain = new_chain(&key);
        let unsigned = crate::core::transaction::Transaction::new("bad");
        let block = block_after(&chain.current_header(), vec![unsigned], &key);

        assert!(matches!(
            chain.add_block(&block),
            Err(BlockchainError::Validation(BlockValidatorError::InvalidBlock(
                VerifyError::TransactionInvalid { .. }
            )))
        ));
        assert_eq!(chain.height(), 0);
        assert_eq!(chain.storage().len(), 1);
    }

    #[test]
    fn storage_failure_does_not_append_header() {
        let key = PrivateKey::new();
        let chain =
            Blockchain::new(&genesis(&key), GenesisOnlyStorage(MemoryStorage::new())).unwrap();
        let block = block_after(&chain.current_header(), Vec::new(), &key);

        assert!(matches!(
            chain.add_block(&block),
            Err(BlockchainError::Storage(_))
        ));
        assert_eq!(chain.height(), 0);
    }

    #[test]
    fn block_hash_lookup_matches_stored_block() {
        let key = PrivateKey::new();
        let chain = new_chain(&key);
        let block = block_after(&chain.current_header(), Vec::new(), &key);
        chain.add_block(&block).unwrap();

        let hash = chain.get_block_hash(1).unwrap();
        assert_eq!(hash, block.hash());
        assert_eq!(*chain.storage().get_block(&hash).unwrap(), block);
    }

    #[test]
    fn concurrent_readers_see_consistent_heights() {
        let key = PrivateKey::new();
        let chain = Arc::new(new_chain(&key));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let chain = chain.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        let height = chain.height();
                        let header = chain.get_header(height).unwrap();
                        assert!(header.height() >= height);
                    }
                })
            })
            .collect();

        for _ in 0..50 {
            let block = block_after(&chain.current_header(), Vec::new(), &key);
            chain.add_block(&block).unwrap();
        }

        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(chain.height(), 50);
    }
}
