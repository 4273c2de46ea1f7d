//! Signing keys and their encrypted storage.

pub mod key_pair;
pub mod keystore;
