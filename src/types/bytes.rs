//! Shared, cheaply cloneable byte buffer used for payloads and encoded values.

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink, decode_len, encode_len, take};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Byte buffer behind an `Arc`; clones share the allocation and writes copy
/// on demand.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Bytes(Arc<Vec<u8>>);

impl Bytes {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self(Arc::new(data.into()))
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(Arc::new(Vec::with_capacity(capacity)))
    }

    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.as_ref().clone()
    }

    /// Appends to the buffer, cloning the contents first if they are shared.
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        Arc::make_mut(&mut self.0).extend_from_slice(data);
    }
}

impl Deref for Bytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for Bytes {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bytes(")?;
        for byte in self.iter().take(32) {
            write!(f, "{byte:02x}")?;
        }
        if self.len() > 32 {
            write!(f, "..; {} bytes", self.len())?;
        }
        write!(f, ")")
    }
}

impl Encode for Bytes {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        encode_len(self.len(), out);
        out.write(self.as_slice());
    }
}

impl Decode for Bytes {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = decode_len(input)?;
        Ok(Self::new(take(input, len)?))
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&[u8]> for Bytes {
    fn from(data: &[u8]) -> Self {
        Self::new(data)
    }
}

impl<const N: usize> From<&[u8; N]> for Bytes {
    fn from(data: &[u8; N]) -> Self {
        Self::new(data.as_slice())
    }
}

impl From<&str> for Bytes {
    fn from(data: &str) -> Self {
        Self::new(data)
    }
}

impl From<String> for Bytes {
    fn from(data: String) -> Self {
        Self::new(data)
    }
}
