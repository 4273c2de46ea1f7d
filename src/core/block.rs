//! Block headers and signed blocks.

use crate::core::transaction::{Transaction, VerifyError};
use crate::crypto::key_pair::{CryptoError, PrivateKey, PublicKey, Signature};
use crate::types::bytes::Bytes;
use crate::types::encoding::Encode;
use crate::types::hash::Hash;
use crate::types::merkle_tree::MerkleTree;
use crate::utils::clock::unix_nanos;
use ledger_derive::{BinaryCodec, Error};
use std::collections::HashSet;
use std::sync::OnceLock;

pub const HEADER_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("header field `{0}` was never set")]
    MissingField(&'static str),
}

/// Block metadata. Fields are fixed at construction; the encoded form is
/// `version | data_hash | prev_block_hash | timestamp | height` and is exactly
/// what gets hashed and signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinaryCodec)]
pub struct Header {
    version: u32,
    data_hash: Hash,
    prev_block_hash: Hash,
    timestamp: i64,
    height: u32,
}

impl Header {
    pub fn builder() -> HeaderBuilder {
        HeaderBuilder::default()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Merkle root over the block's encoded transactions.
    pub fn data_hash(&self) -> Hash {
        self.data_hash
    }

    /// Hash of the parent header; zero for genesis.
    pub fn prev_block_hash(&self) -> Hash {
        self.prev_block_hash
    }

    /// Unix time in nanoseconds.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Canonical encoding used for hashing and signing.
    pub fn bytes(&self) -> Bytes {
        self.to_bytes()
    }

    pub fn hash(&self) -> Hash {
        Hash::of(self)
    }
}

/// Collects header fields; `height` and `prev_block_hash` are mandatory.
#[derive(Debug, Default, Clone)]
pub struct HeaderBuilder {
    version: Option<u32>,
    data_hash: Option<Hash>,
    prev_block_hash: Option<Hash>,
    timestamp: Option<i64>,
    height: Option<u32>,
}

impl HeaderBuilder {
    pub fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn data_hash(mut self, data_hash: Hash) -> Self {
        self.data_hash = Some(data_hash);
        self
    }

    /// Sets `data_hash` to the Merkle root of `transactions`.
    pub fn data_hash_of(self, transactions: &[Transaction]) -> Self {
        self.data_hash(MerkleTree::from_transactions(transactions))
    }

    pub fn prev_block_hash(mut self, prev_block_hash: Hash) -> Self {
        self.prev_block_hash = Some(prev_block_hash);
        self
    }

    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn height(mut self, height: u32) -> Self {
        self.height = Some(height);
        self
    }

    /// Version defaults to [`HEADER_VERSION`], the timestamp to now and the
    /// data hash to zero (an empty block).
    pub fn build(self) -> Result<Header, HeaderError> {
        Ok(Header {
            version: self.version.unwrap_or(HEADER_VERSION),
            data_hash: self.data_hash.unwrap_or_default(),
            prev_block_hash: self
                .prev_block_hash
                .ok_or(HeaderError::MissingField("prev_block_hash"))?,
            timestamp: self.timestamp.unwrap_or_else(unix_nanos),
            height: self.height.ok_or(HeaderError::MissingField("height"))?,
        })
    }
}

/// A header, its transactions and the validator's signature over the header.
///
/// The block hash is the hash of the header alone. Transactions are bound to
/// it through `data_hash`, which `verify` checks against the actual list.
#[derive(Debug, Clone, BinaryCodec)]
pub struct Block {
    header: Header,
    transactions: Vec<Transaction>,
    validator: Option<PublicKey>,
    signature: Option<Signature>,
    #[binary_codec(skip)]
    hash: OnceLock<Hash>,
}

impl Block {
    /// Unsigned block. `header.data_hash` is taken as given, see [`Block::verify`].
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
            validator: None,
            signature: None,
            hash: OnceLock::new(),
        }
    }

    /// Unsigned, empty block at height zero with a zero parent.
    pub fn genesis(timestamp: i64) -> Self {
        let header = Header {
            version: HEADER_VERSION,
            data_hash: Hash::zero(),
            prev_block_hash: Hash::zero(),
            timestamp,
            height: 0,
        };
        Self::new(header, Vec::new())
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }

    /// Transactions in block order.
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Key that signed the header, if any.
    pub fn validator(&self) -> Option<&PublicKey> {
        self.validator.as_ref()
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    /// Hash of the header, computed once.
    pub fn hash(&self) -> Hash {
        *self.hash.get_or_init(|| self.header.hash())
    }

    /// Signs the encoded header and records `key` as the block's validator.
    pub fn sign(&mut self, key: &PrivateKey) -> Result<(), CryptoError> {
        let signature = key.sign(self.header.bytes().as_slice())?;
        self.validator = Some(key.public_key());
        self.signature = Some(signature);
        Ok(())
    }

    /// Checks the block signature, then every transaction in order, then that
    /// no transaction hash repeats, then that `data_hash` commits to exactly
    /// these transactions.
    pub fn verify(&self) -> Result<(), VerifyError> {
        let (Some(validator), Some(signature)) = (&self.validator, &self.signature) else {
            return Err(VerifyError::MissingSignature);
        };
        if !validator.verify(self.header.bytes().as_slice(), signature) {
            return Err(VerifyError::SignatureMismatch);
        }

        for tx in &self.transactions {
            tx.verify().map_err(|reason| VerifyError::TransactionInvalid {
                hash: tx.hash(),
                reason: Box::new(reason),
            })?;
        }

        let mut seen = HashSet::with_capacity(self.transactions.len());
        for tx in &self.transactions {
            if !seen.insert(tx.hash()) {
                return Err(VerifyError::DuplicateTransaction(tx.hash()));
            }
        }

        let actual = MerkleTree::from_transactions(&self.transactions);
        if actual != self.header.data_hash {
            return Err(VerifyError::DataHashMismatch {
                expected: self.header.data_hash,
                actual,
            });
        }
        Ok(())
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header
            && self.transactions == other.transactions
            && self.validator == other.validator
            && self.signature == other.signature
    }
}

impl Eq for Block {}
