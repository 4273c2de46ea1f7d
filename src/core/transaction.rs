//! Signed opaque-payload transactions.

use crate::crypto::key_pair::{CryptoError, PrivateKey, PublicKey, Signature};
use crate::types::bytes::Bytes;
use crate::types::hash::Hash;
use ledger_derive::{BinaryCodec, Error};
use std::sync::OnceLock;

/// Reasons a transaction or block fails its own integrity checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("missing signature")]
    MissingSignature,
    #[error("signature does not verify against the signer's key")]
    SignatureMismatch,
    #[error("transaction {hash} is invalid: {reason}")]
    TransactionInvalid { hash: Hash, reason: Box<VerifyError> },
    #[error("transaction {0} appears more than once")]
    DuplicateTransaction(Hash),
    #[error("data hash mismatch: header has {expected}, transactions hash to {actual}")]
    DataHashMismatch { expected: Hash, actual: Hash },
}

/// A payload signed by its sender.
///
/// Only `data`, `from` and `signature` are encoded. The hash covers `data`
/// alone, which cannot change after construction, so signing a transaction
/// never changes its hash. `first_seen` is local bookkeeping stamped by the
/// node when the transaction enters its pool.
#[derive(Debug, Clone, BinaryCodec)]
pub struct Transaction {
    data: Bytes,
    from: Option<PublicKey>,
    signature: Option<Signature>,
    #[binary_codec(skip)]
    hash: OnceLock<Hash>,
    #[binary_codec(skip)]
    first_seen: i64,
}

impl Transaction {
    /// Unsigned transaction carrying `data`.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            from: None,
            signature: None,
            hash: OnceLock::new(),
            first_seen: 0,
        }
    }

    /// Opaque payload. Only this is hashed.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Signer, set by [`Transaction::sign`].
    pub fn from(&self) -> Option<&PublicKey> {
        self.from.as_ref()
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    /// SHA-256 of the payload, computed on first use.
    pub fn hash(&self) -> Hash {
        *self.hash.get_or_init(|| Hash::digest(self.data.as_slice()))
    }

    /// Local admission time in Unix nanoseconds, zero until the pool stamps it.
    ///
    /// Never encoded, so a received transaction always starts at zero.
    pub fn first_seen(&self) -> i64 {
        self.first_seen
    }

    pub fn set_first_seen(&mut self, nanos: i64) {
        self.first_seen = nanos;
    }

    /// Signs the payload and records the signer.
    pub fn sign(&mut self, key: &PrivateKey) -> Result<(), CryptoError> {
        let signature = key.sign(self.data.as_slice())?;
        self.from = Some(key.public_key());
        self.signature = Some(signature);
        Ok(())
    }

    /// Checks that the transaction is signed and the signature covers `data`.
    pub fn verify(&self) -> Result<(), VerifyError> {
        let (Some(from), Some(signature)) = (&self.from, &self.signature) else {
            return Err(VerifyError::MissingSignature);
        };
        if !from.verify(self.data.as_slice(), signature) {
            return Err(VerifyError::SignatureMismatch);
        }
        Ok(())
    }
}

/// Equality over the encoded fields; local metadata is ignored.
impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data && self.from == other.from && self.signature == other.signature
    }
}

impl Eq for Transaction {}
