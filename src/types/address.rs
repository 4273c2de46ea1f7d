//! 20-byte account addresses.

use ledger_derive::BinaryCodec;
use std::fmt;

pub const ADDRESS_LEN: usize = 20;

/// Identifier derived from a public key: the low-order 20 bytes of the
/// SHA-256 digest of its compressed encoding.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BinaryCodec)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    /// Keeps the trailing `ADDRESS_LEN` bytes of a 32-byte digest.
    pub fn from_digest(digest: &[u8; 32]) -> Self {
        let mut out = [0u8; ADDRESS_LEN];
        out.copy_from_slice(&digest[32 - ADDRESS_LEN..]);
        Self(out)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}
