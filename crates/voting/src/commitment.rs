// voting/src/commitment.rs

use crate::{VotingError, VotingResult};
use oracle_core::{Epoch, JobVote};
use oracle_crypto::{keccak_concat, Address, Hash, MerkleProof, MerkleTree};
use serde::{Deserialize, Serialize};

/// keccak256(root ‖ secret ‖ address)
pub fn commitment_hash(root: &Hash, secret: &Hash, address: &Address) -> Hash {
    keccak_concat(&[root.as_bytes(), secret.as_bytes(), address.as_bytes()])
}

/// Everything a staker discloses in the reveal phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealRequest {
    pub epoch: Epoch,
    pub root: Hash,
    pub votes: Vec<JobVote>,
    pub proofs: Vec<MerkleProof>,
    pub secret: Hash,
}

/// A staker's votes for one epoch, arranged as a Merkle tree
#[derive(Debug, Clone)]
pub struct RevealBatch {
    votes: Vec<JobVote>,
    tree: MerkleTree,
}

impl RevealBatch {
    pub fn new(votes: Vec<JobVote>) -> VotingResult<Self> {
        if votes.is_empty() {
            return Err(VotingError::EmptyReveal);
        }
        let leaves = votes.iter().map(JobVote::leaf).collect();
        let tree = MerkleTree::from_leaves(leaves)?;
        Ok(Self { votes, tree })
    }

    pub fn root(&self) -> Hash {
        self.tree.root()
    }

    pub fn votes(&self) -> &[JobVote] {
        &self.votes
    }

    pub fn commitment(&self, secret: &Hash, address: &Address) -> Hash {
        commitment_hash(&self.root(), secret, address)
    }

    pub fn proofs(&self) -> VotingResult<Vec<MerkleProof>> {
        (0..self.votes.len())
            .map(|i| self.tree.proof(i).map_err(VotingError::from))
            .collect()
    }

    /// Package the batch for `reveal`
    pub fn request(&self, epoch: Epoch, secret: Hash) -> VotingResult<RevealRequest> {
        Ok(RevealRequest {
            epoch,
            root: self.root(),
            votes: self.votes.clone(),
            proofs: self.proofs()?,
            secret,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oracle_crypto::Hashable;

    #[test]
    fn test_commitment_binds_every_input() {
        let root = b"root".as_slice().hash();
        let secret = b"secret".as_slice().hash();
        let alice = Address::derive(b"alice");
        let bob = Address::derive(b"bob");

        let base = commitment_hash(&root, &secret, &alice);
        assert_eq!(base, commitment_hash(&root, &secret, &alice));
        assert_ne!(base, commitment_hash(&root, &secret, &bob));
        assert_ne!(base, commitment_hash(&root, &b"other".as_slice().hash(), &alice));
        assert_ne!(base, commitment_hash(&secret, &root, &alice));
    }

    #[test]
    fn test_batch_proofs_verify() {
        let batch = RevealBatch::new(vec![
            JobVote::new(1, 42u64),
            JobVote::new(2, 7u64),
            JobVote::new(3, 1_000u64),
        ])
        .unwrap();

        let request = batch.request(5, b"s".as_slice().hash()).unwrap();
        assert_eq!(request.proofs.len(), 3);
        for (vote, proof) in request.votes.iter().zip(&request.proofs) {
            assert!(proof.verify(request.root, vote.leaf()));
        }
        // Proofs are positional
        assert!(!request.proofs[0].verify(request.root, request.votes[1].leaf()));
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(matches!(RevealBatch::new(vec![]), Err(VotingError::EmptyReveal)));
    }
}
