//! Blocks kept in memory for the lifetime of the process.

use crate::core::block::Block;
use crate::storage::storage_trait::{Storage, StorageError};
use crate::types::hash::Hash;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Default)]
struct Inner {
    blocks: HashMap<Hash, Arc<Block>>,
    /// Block hash at each height, genesis first.
    by_height: Vec<Hash>,
}

/// Thread-safe block store. Blocks must arrive in height order starting at 0.
#[derive(Default)]
pub struct MemoryStorage {
    inner: RwLock<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_block(&self, hash: &Hash) -> Option<Arc<Block>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.blocks.get(hash).cloned()
    }

    pub fn get_block_by_height(&self, height: u32) -> Option<Arc<Block>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let hash = inner.by_height.get(height as usize)?;
        inner.blocks.get(hash).cloned()
    }

    pub fn has_block(&self, hash: &Hash) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.blocks.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.by_height.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Storage for MemoryStorage {
    fn put(&self, block: &Block) -> Result<(), StorageError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let expected = inner.by_height.len() as u32;
        if block.height() != expected {
            return Err(StorageError::OutOfOrder {
                hash: block.hash(),
                height: block.height(),
                expected,
            });
        }

        let hash = block.hash();
        inner.blocks.insert(hash, Arc::new(block.clone()));
        inner.by_height.push(hash);
        Ok(())
    }
}
