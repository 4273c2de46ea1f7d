//! Rules deciding whether a block may extend the chain.
//!
//! [`Validator`] is the seam; [`BlockValidator`] is the rule set the ledger
//! uses by default.

use crate::core::block::{Block, Header};
use crate::core::transaction::VerifyError;
use crate::crypto::key_pair::PublicKey;
use crate::types::hash::Hash;
use ledger_derive::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockValidatorError {
    #[error("block at height {height} is already present (chain height {current})")]
    BlockAlreadyPresent { height: u32, current: u32 },
    #[error("height mismatch: expected {expected}, got {actual}")]
    HeightMismatch { expected: u32, actual: u32 },
    #[error("previous hash mismatch: chain has {expected}, block links to {actual}")]
    PrevHashMismatch { expected: Hash, actual: Hash },
    #[error("invalid block: {0}")]
    InvalidBlock(VerifyError),
    #[error("block signed by {0}, which is not the chain's validator")]
    UnauthorizedValidator(String),
    #[error("block rejected: {0}")]
    Rejected(String),
}

impl From<VerifyError> for BlockValidatorError {
    fn from(err: VerifyError) -> Self {
        BlockValidatorError::InvalidBlock(err)
    }
}

/// Read-only window onto the committed headers, valid while the ledger's
/// write lock is held. Validators get nothing that could mutate the chain.
#[derive(Clone, Copy)]
pub struct ChainView<'a> {
    headers: &'a [Header],
}

impl<'a> ChainView<'a> {
    pub(crate) fn new(headers: &'a [Header]) -> Self {
        Self { headers }
    }

    pub fn height(&self) -> u32 {
        self.headers.len().saturating_sub(1) as u32
    }

    pub fn has_height(&self, height: u32) -> bool {
        (height as usize) < self.headers.len()
    }

    pub fn get_header(&self, height: u32) -> Option<&'a Header> {
        self.headers.get(height as usize)
    }

    pub fn tip(&self) -> Option<&'a Header> {
        self.headers.last()
    }
}

pub trait Validator: Send + Sync {
    fn validate_block(&self, chain: ChainView<'_>, block: &Block) -> Result<(), BlockValidatorError>;
}

/// Height, linkage and signature checks, applied in that order:
///
/// 1. `height <= chain height` fails with `BlockAlreadyPresent`
/// 2. `height != chain height + 1` fails with `HeightMismatch`
/// 3. `prev_block_hash` must equal the hash of the header below
/// 4. `Block::verify` must pass
/// 5. with an authority configured, the block must be signed by it
///
/// There is exactly one valid successor position, so competing blocks at the
/// same height are refused outright rather than kept as forks.
#[derive(Debug, Clone, Default)]
pub struct BlockValidator {
    authority: Option<PublicKey>,
}

impl BlockValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept blocks signed by `authority`.
    pub fn with_authority(authority: PublicKey) -> Self {
        Self {
            authority: Some(authority),
        }
    }

    pub fn authority(&self) -> Option<&PublicKey> {
        self.authority.as_ref()
    }
}

impl Validator for BlockValidator {
    fn validate_block(&self, chain: ChainView<'_>, block: &Block) -> Result<(), BlockValidatorError> {
        let current = chain.height();
        let height = block.height();

        if height <= current {
            return Err(BlockValidatorError::BlockAlreadyPresent { height, current });
        }

        let expected = current + 1;
        if height != expected {
            return Err(BlockValidatorError::HeightMismatch {
                expected,
                actual: height,
            });
        }

        let parent = chain
            .get_header(height - 1)
            .ok_or(BlockValidatorError::HeightMismatch {
                expected,
                actual: height,
            })?;
        let parent_hash = parent.hash();
        if parent_hash != block.header().prev_block_hash() {
            return Err(BlockValidatorError::PrevHashMismatch {
                expected: parent_hash,
                actual: block.header().prev_block_hash(),
            });
        }

        block.verify()?;

        if let Some(authority) = &self.authority
            && block.validator() != Some(authority)
        {
            let signer = block
                .validator()
                .map(|key| key.address().to_string())
                .unwrap_or_default();
            return Err(BlockValidatorError::UnauthorizedValidator(signer));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key_pair::PrivateKey;
    use crate::utils::test_utils::utils::{block_after, genesis, random_hash, signed_transaction};

    fn two_block_chain(key: &PrivateKey) -> Vec<Header> {
        let genesis = genesis(key);
        let first = block_after(genesis.header(), Vec::new(), key);
        vec![*genesis.header(), *first.header()]
    }

    #[test]
    fn accepts_the_next_linked_block() {
        let key = PrivateKey::new();
        let headers = two_block_chain(&key);
        let block = block_after(&headers[1], vec![signed_transaction(b"tx")], &key);

        assert_eq!(BlockValidator::new().validate_block(ChainView::new(&headers), &block), Ok(()));
    }

    #[test]
    fn existing_height_is_already_present() {
        let key = PrivateKey::new();
        let headers = two_block_chain(&key);
        let block = block_after(&headers[0], Vec::new(), &key);

        assert_eq!(
            BlockValidator::new().validate_block(ChainView::new(&headers), &block),
            Err(BlockValidatorError::BlockAlreadyPresent {
                height: 1,
                current: 1
            })
        );
    }

    #[test]
    fn skipped_height_is_a_mismatch() {
        let key = PrivateKey::new();
        let headers = two_block_chain(&key);
        let skipped = block_after(&headers[1], Vec::new(), &key);
        let block = block_after(skipped.header(), Vec::new(), &key);

        assert_eq!(
            BlockValidator::new().validate_block(ChainView::new(&headers), &block),
            Err(BlockValidatorError::HeightMismatch {
                expected: 2,
                actual: 3
            })
        );
    }

    #[test]
    fn wrong_parent_is_rejected_despite_valid_signature() {
        let key = PrivateKey::new();
        let headers = two_block_chain(&key);
        let wrong_parent = random_hash();
        let header = Header::builder()
            .height(2)
            .prev_block_hash(wrong_parent)
            .build()
            .unwrap();
        let mut block = Block::new(header, Vec::new());
        block.sign(&key).unwrap();
        assert!(block.verify().is_ok());

        assert_eq!(
            BlockValidator::new().validate_block(ChainView::new(&headers), &block),
            Err(BlockValidatorError::PrevHashMismatch {
                expected: headers[1].hash(),
                actual: wrong_parent
            })
        );
    }

    #[test]
    fn unsigned_block_is_invalid() {
        let key = PrivateKey::new();
        let headers = two_block_chain(&key);
        let header = Header::builder()
            .height(2)
            .prev_block_hash(headers[1].hash())
            .build()
            .unwrap();
        let block = Block::new(header, Vec::new());

        assert_eq!(
            BlockValidator::new().validate_block(ChainView::new(&headers), &block),
            Err(BlockValidatorError::InvalidBlock(VerifyError::MissingSignature))
        );
    }

    #[test]
    fn height_checks_run_before_signature_checks() {
        let key = PrivateKey::new();
        let headers = two_block_chain(&key);
        let header = Header::builder()
            .height(1)
            .prev_block_hash(random_hash())
            .build()
            .unwrap();
        let unsigned = Block::new(header, Vec::new());

        assert!(matches!(
            BlockValidator::new().validate_block(ChainView::new(&headers), &unsigned),
            Err(BlockValidatorError::BlockAlreadyPresent { .. })
        ));
    }

    #[test]
    fn authority_rejects_other_signers() {
        let authority = PrivateKey::new();
        let intruder = PrivateKey::new();
        let headers = two_block_chain(&authority);
        let validator = BlockValidator::with_authority(authority.public_key());

        let forged = block_after(&headers[1], Vec::new(), &intruder);
        assert!(matches!(
            validator.validate_block(ChainView::new(&headers), &forged),
            Err(BlockValidatorError::UnauthorizedValidator(_))
        ));

        let genuine = block_after(&headers[1], Vec::new(), &authority);
        assert_eq!(validator.validate_block(ChainView::new(&headers), &genuine), Ok(()));
    }

    #[test]
    fn authority_signed_block_with_appended_duplicate_is_rejected() {
        let authority = PrivateKey::new();
        let headers = two_block_chain(&authority);
        let validator = BlockValidator::with_authority(authority.public_key());
        let txs = vec![
            signed_transaction(b"a"),
            signed_transaction(b"b"),
            signed_transaction(b"c"),
        ];
        let block = block_after(&headers[1], txs, &authority);

        // Re-encode with the last transaction repeated; header and signature stay valid.
        let mut tampered_txs = block.transactions().to_vec();
        tampered_txs.push(tampered_txs[2].clone());
        let mut tampered = Block::new(*block.header(), tampered_txs);
        tampered.sign(&authority).unwrap();
        assert_eq!(tampered.hash(), block.hash());

        assert!(matches!(
            validator.validate_block(ChainView::new(&headers), &tampered),
            Err(BlockValidatorError::InvalidBlock(
                VerifyError::DuplicateTransaction(_)
            ))
        ));
    }

    #[test]
    fn chain_view_queries() {
        let key = PrivateKey::new();
        let headers = two_block_chain(&key);
        let view = ChainView::new(&headers);

        assert_eq!(view.height(), 1);
        assert!(view.has_height(1));
        assert!(!view.has_height(2));
        assert_eq!(view.get_header(0), Some(&headers[0]));
        assert_eq!(view.tip(), Some(&headers[1]));
    }
}
