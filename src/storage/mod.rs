//! Block persistence.
//!
//! - [`storage_trait`]: the [`Storage`](storage_trait::Storage) contract the ledger writes through
//! - [`memory_storage`]: in-process implementation indexed by hash and height

pub mod memory_storage;
pub mod storage_trait;
