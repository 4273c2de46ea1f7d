//! Single-validator ledger node.
//!
//! Signed transactions are admitted into a pool, a designated validator
//! periodically seals them into signed, hash-linked blocks, and every node
//! appends blocks to its ledger only after validating them.

pub mod core;
pub mod crypto;
pub mod network;
pub mod storage;
pub mod types;
pub mod utils;
