//! Contract between the ledger and whatever keeps full blocks.

use crate::core::block::Block;
use crate::types::hash::Hash;
use ledger_derive::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("refusing block {hash} at height {height}: next expected height is {expected}")]
    OutOfOrder { hash: Hash, height: u32, expected: u32 },
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Sink for committed blocks.
///
/// The ledger calls `put` while holding its write lock, once per accepted
/// block and in height order. Any error aborts the surrounding append.
pub trait Storage: Send + Sync {
    fn put(&self, block: &Block) -> Result<(), StorageError>;
}
