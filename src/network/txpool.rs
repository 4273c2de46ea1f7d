//! Transaction pool for pending transactions awaiting block inclusion.
//!
//! Entries are keyed by transaction hash. Ordering is not stored: it is
//! derived from each transaction's `first_seen` stamp when the pool is read.

use crate::core::transaction::Transaction;
use crate::types::hash::Hash;
use std::collections::HashMap;
use std::mem;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Thread-safe pool of pending transactions.
#[derive(Default)]
pub struct TxPool {
    transactions: RwLock<HashMap<Hash, Transaction>>,
}

impl TxPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Hash, Transaction>> {
        self.transactions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Hash, Transaction>> {
        self.transactions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts `transaction`, replacing any entry with the same hash.
    ///
    /// Callers wanting insert-if-absent semantics check [`TxPool::has`] first.
    pub fn add(&self, transaction: Transaction) {
        self.write().insert(transaction.hash(), transaction);
    }

    /// Whether a transaction with this hash is pending.
    pub fn has(&self, hash: &Hash) -> bool {
        self.read().contains_key(hash)
    }

    /// Number of pending transactions.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drops every entry by swapping in a fresh map.
    pub fn flush(&self) {
        let old = mem::take(&mut *self.write());
        drop(old);
    }

    /// Removes the given hashes; unknown hashes are ignored.
    pub fn remove_batch(&self, hashes: &[Hash]) {
        let mut transactions = self.write();
        for hash in hashes {
            transactions.remove(hash);
        }
    }

    /// Snapshot of the pool ordered by ascending `first_seen`.
    ///
    /// The sort is stable, so entries with equal stamps keep the relative
    /// order they had in the snapshot for the duration of this call.
    pub fn transactions(&self) -> Vec<Transaction> {
        let mut snapshot: Vec<Transaction> = self.read().values().cloned().collect();
        snapshot.sort_by_key(Transaction::first_seen);
        snapshot
    }
}
