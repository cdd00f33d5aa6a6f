// oracle-crypto/src/merkle.rs

use crate::{hash::keccak_concat, CryptoError, CryptoResult, Hash};
use serde::{Deserialize, Serialize};

/// Merkle tree over pre-hashed leaves, padded to a power of two with zero hashes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleTree {
    /// All nodes in the tree (stored as a flat array, root at index 0)
    nodes: Vec<Hash>,
    /// Number of real leaf nodes
    leaf_count: usize,
}

impl MerkleTree {
    /// Build a Merkle tree from leaf hashes
    pub fn from_leaves(leaves: Vec<Hash>) -> CryptoResult<Self> {
        if leaves.is_empty() {
            return Err(CryptoError::MerkleError("Cannot create empty tree".into()));
        }

        let leaf_count = leaves.len();
        let padded = leaf_count.next_power_of_two();
        let leaf_start = padded - 1;
        let mut nodes = vec![Hash::zero(); 2 * padded - 1];

        for (i, leaf) in leaves.into_iter().enumerate() {
            nodes[leaf_start + i] = leaf;
        }

        // Build tree from bottom up
        for i in (0..leaf_start).rev() {
            nodes[i] = Self::combine_hashes(nodes[2 * i + 1], nodes[2 * i + 2]);
        }

        Ok(Self { nodes, leaf_count })
    }

    pub fn root(&self) -> Hash {
        self.nodes[0]
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Generate a Merkle proof for a specific leaf
    pub fn proof(&self, index: usize) -> CryptoResult<MerkleProof> {
        if index >= self.leaf_count {
            return Err(CryptoError::MerkleError("Index out of bounds".into()));
        }

        let mut siblings = Vec::new();
        let mut current = self.leaf_start() + index;

        while current > 0 {
            let sibling = if current % 2 == 1 { current + 1 } else { current - 1 };
            siblings.push(self.nodes[sibling]);
            current = (current - 1) / 2;
        }

        Ok(MerkleProof {
            leaf_index: index,
            siblings,
        })
    }

    /// Verify that `leaf` sits at `proof.leaf_index` under `root`
    pub fn verify_proof(root: Hash, proof: &MerkleProof, leaf: Hash) -> bool {
        if proof.siblings.len() >= usize::BITS as usize
            || proof.leaf_index >> proof.siblings.len() != 0
        {
            return false;
        }

        let mut current = leaf;
        let mut index = proof.leaf_index;

        for sibling in &proof.siblings {
            current = if index % 2 == 0 {
                Self::combine_hashes(current, *sibling)
            } else {
                Self::combine_hashes(*sibling, current)
            };
            index /= 2;
        }

        current == root
    }

    fn leaf_start(&self) -> usize {
        self.nodes.len() / 2
    }

    fn combine_hashes(left: Hash, right: Hash) -> Hash {
        keccak_concat(&[left.as_bytes(), right.as_bytes()])
    }
}

/// Inclusion proof for a single leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    leaf_index: usize,
    siblings: Vec<Hash>,
}

impl MerkleProof {
    pub fn new(leaf_index: usize, siblings: Vec<Hash>) -> Self {
        Self { leaf_index, siblings }
    }

    pub fn leaf_index(&self) -> usize {
        self.leaf_index
    }

    pub fn siblings(&self) -> &[Hash] {
        &self.siblings
    }

    pub fn verify(&self, root: Hash, leaf: Hash) -> bool {
        MerkleTree::verify_proof(root, self, leaf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Hashable;
    use proptest::prelude::*;

    fn leaves(words: &[&str]) -> Vec<Hash> {
        words.iter().map(|w| w.as_bytes().hash()).collect()
    }

    #[test]
    fn test_merkle_tree_basic() {
        let tree = MerkleTree::from_leaves(leaves(&["leaf1", "leaf2", "leaf3", "leaf4"])).unwrap();
        assert_eq!(tree.leaf_count(), 4);
        assert_ne!(tree.root(), Hash::zero());
    }

    #[test]
    fn test_merkle_proof_invalid_leaf() {
        let tree = MerkleTree::from_leaves(leaves(&["apple", "banana", "cherry"])).unwrap();
        let proof = tree.proof(0).unwrap();
        assert!(!proof.verify(tree.root(), b"invalid".as_slice().hash()));
    }

    #[test]
    fn test_proof_rejects_wrong_position() {
        let items = leaves(&["apple", "banana", "cherry", "dates"]);
        let tree = MerkleTree::from_leaves(items.clone()).unwrap();
        let proof = tree.proof(0).unwrap();
        let moved = MerkleProof::new(1, proof.siblings().to_vec());
        assert!(!moved.verify(tree.root(), items[0]));
    }

    #[test]
    fn test_single_leaf() {
        let items = leaves(&["single"]);
        let tree = MerkleTree::from_leaves(items.clone()).unwrap();
        assert_eq!(tree.root(), items[0]);
        assert!(tree.proof(0).unwrap().verify(tree.root(), items[0]));
    }

    #[test]
    fn test_empty_tree_rejected() {
        assert!(MerkleTree::from_leaves(Vec::new()).is_err());
    }

    proptest! {
        #[test]
        fn every_leaf_proves_against_root(count in 1usize..40) {
            let items: Vec<Hash> = (0..count)
                .map(|i| (i as u64).to_be_bytes().to_vec().hash())
                .collect();
            let tree = MerkleTree::from_leaves(items.clone()).unwrap();
            for (i, leaf) in items.iter().enumerate() {
                prop_assert!(tree.proof(i).unwrap().verify(tree.root(), *leaf));
            }
        }
    }
}
