//! Merkle root over a block's transactions, stored in a header's `data_hash`.
//!
//! Leaves commit to the full encoded transaction (payload, signer and
//! signature), not just its payload hash. Leaves and inner nodes are hashed
//! under different prefixes so neither can be passed off as the other. A
//! level with an odd number of nodes carries its last node up unchanged, so
//! no list shares a root with the same list plus a repeated tail. An empty
//! list yields `Hash::zero()`.

use crate::core::transaction::Transaction;
use crate::types::encoding::Encode;
use crate::types::hash::Hash;

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

pub struct MerkleTree;

impl MerkleTree {
    /// `sha256(0x00 || encode(tx))`.
    pub fn leaf(tx: &Transaction) -> Hash {
        let mut builder = Hash::sha256();
        builder.update(&[LEAF_PREFIX]);
        tx.encode(&mut builder);
        builder.finalize()
    }

    /// `sha256(0x01 || left || right)`.
    fn parent(left: &Hash, right: &Hash) -> Hash {
        let mut builder = Hash::sha256();
        builder.update(&[NODE_PREFIX]);
        builder.update(left.as_slice());
        builder.update(right.as_slice());
        builder.finalize()
    }

    /// Reduces already-hashed leaves to a single root, reusing the vector for
    /// every level.
    pub fn root(mut nodes: Vec<Hash>) -> Hash {
        if nodes.is_empty() {
            return Hash::zero();
        }

        while nodes.len() > 1 {
            let next_len = nodes.len().div_ceil(2);
            for i in 0..next_len {
                let left = nodes[2 * i];
                nodes[i] = match nodes.get(2 * i + 1) {
                    Some(right) => Self::parent(&left, right),
                    None => left,
                };
            }
            nodes.truncate(next_len);
        }

        nodes[0]
    }

    pub fn from_transactions(transactions: &[Transaction]) -> Hash {
        Self::root(transactions.iter().map(Self::leaf).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key_pair::PrivateKey;
    use crate::utils::test_utils::utils::{signed_transaction, signed_transaction_by};

    #[test]
    fn empty_is_zero() {
        assert_eq!(MerkleTree::root(Vec::new()), Hash::zero());
        assert_eq!(MerkleTree::from_transactions(&[]), Hash::zero());
    }

    #[test]
    fn single_leaf_is_its_own_root() {
        let leaf = Hash::digest(b"only");
        assert_eq!(MerkleTree::root(vec![leaf]), leaf);
    }

    #[test]
    fn odd_last_node_is_promoted() {
        let (a, b, c) = (Hash::digest(b"a"), Hash::digest(b"b"), Hash::digest(b"c"));
        let expected = MerkleTree::parent(&MerkleTree::parent(&a, &b), &c);
        assert_eq!(MerkleTree::root(vec![a, b, c]), expected);
    }

    #[test]
    fn repeated_tail_changes_the_root() {
        let a = signed_transaction(b"a");
        let b = signed_transaction(b"b");
        let c = signed_transaction(b"c");

        let three = MerkleTree::from_transactions(&[a.clone(), b.clone(), c.clone()]);
        let four = MerkleTree::from_transactions(&[a, b, c.clone(), c]);
        assert_ne!(three, four);
    }

    #[test]
    fn leaf_cannot_stand_in_for_an_inner_node() {
        let a = signed_transaction(b"a");
        let b = signed_transaction(b"b");
        let pair_root = MerkleTree::from_transactions(&[a.clone(), b.clone()]);

        // A transaction whose payload spells out the inner node preimage.
        let mut forged_data = vec![NODE_PREFIX];
        forged_data.extend_from_slice(MerkleTree::leaf(&a).as_slice());
        forged_data.extend_from_slice(MerkleTree::leaf(&b).as_slice());
        let forged = signed_transaction(&forged_data);

        assert_ne!(MerkleTree::from_transactions(&[forged]), pair_root);
    }

    #[test]
    fn signer_is_committed() {
        let honest = signed_transaction_by(b"pay 5", &PrivateKey::new());
        let resigned = signed_transaction_by(b"pay 5", &PrivateKey::new());
        assert_eq!(honest.hash(), resigned.hash());

        assert_ne!(
            MerkleTree::from_transactions(&[honest]),
            MerkleTree::from_transactions(&[resigned])
        );
    }

    #[test]
    fn order_matters() {
        let (a, b) = (signed_transaction(b"a"), signed_transaction(b"b"));
        assert_ne!(
            MerkleTree::from_transactions(&[a.clone(), b.clone()]),
            MerkleTree::from_transactions(&[b, a])
        );
    }
}
