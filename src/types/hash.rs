//! 32-byte SHA-256 digests.

use crate::types::encoding::{Encode, EncodeSink};
use ledger_derive::BinaryCodec;
use sha2::{Digest, Sha256};
use std::fmt;

pub const HASH_LEN: usize = 32;

/// A SHA-256 digest.
///
/// The all-zero value stands for "unset" (the genesis parent, an empty
/// transaction list). A real digest equal to zero would be read the same way;
/// that collision is accepted rather than guarded against.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BinaryCodec)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    pub const fn zero() -> Self {
        Self([0u8; HASH_LEN])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Starts an incremental SHA-256 computation.
    pub fn sha256() -> HashBuilder {
        HashBuilder {
            hasher: Sha256::new(),
        }
    }

    /// Hashes a byte slice in one go.
    pub fn digest(data: &[u8]) -> Self {
        let mut builder = Self::sha256();
        builder.update(data);
        builder.finalize()
    }

    /// Hashes the canonical encoding of `value` without materializing it.
    pub fn of<T: Encode>(value: &T) -> Self {
        let mut builder = Self::sha256();
        value.encode(&mut builder);
        builder.finalize()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({self})")
    }
}

/// Incremental hasher. Encodable values can be written straight into it.
pub struct HashBuilder {
    hasher: Sha256,
}

impl HashBuilder {
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(self) -> Hash {
        Hash(self.hasher.finalize().into())
    }
}

impl EncodeSink for HashBuilder {
    fn write(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }
}
