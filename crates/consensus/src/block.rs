// consensus/src/block.rs

use crate::{ConsensusError, ConsensusResult};
use oracle_core::{Amount, AssetId, BlockIndex, Epoch, StakerId, Timestamp};
use oracle_crypto::{keccak_concat, Hash};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Arguments of a `propose` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockProposal {
    pub epoch: Epoch,
    pub job_ids: Vec<AssetId>,
    pub medians: Vec<Amount>,
    pub lower_cutoffs: Vec<Amount>,
    pub higher_cutoffs: Vec<Amount>,
    pub iteration: u64,
    pub biggest_staker_id: StakerId,
}

impl BlockProposal {
    /// Shape checks that need no state
    pub fn validate(&self) -> ConsensusResult<()> {
        if self.job_ids.is_empty() {
            return Err(ConsensusError::EmptyBlock);
        }

        let n = self.job_ids.len();
        if self.medians.len() != n || self.lower_cutoffs.len() != n || self.higher_cutoffs.len() != n {
            return Err(ConsensusError::LengthMismatch {
                job_ids: n,
                medians: self.medians.len(),
                lower: self.lower_cutoffs.len(),
                higher: self.higher_cutoffs.len(),
            });
        }

        let mut seen = BTreeSet::new();
        for (i, job_id) in self.job_ids.iter().enumerate() {
            if !seen.insert(*job_id) {
                return Err(ConsensusError::DuplicateJob(*job_id));
            }
            if self.lower_cutoffs[i] > self.medians[i] || self.medians[i] > self.higher_cutoffs[i] {
                return Err(ConsensusError::CutoffOrder(*job_id));
            }
        }
        Ok(())
    }
}

/// A candidate block; at most one per epoch is ever confirmed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedBlock {
    pub index: BlockIndex,
    pub proposer_id: StakerId,
    pub job_ids: Vec<AssetId>,
    pub medians: Vec<Amount>,
    pub lower_cutoffs: Vec<Amount>,
    pub higher_cutoffs: Vec<Amount>,
    pub iteration: u64,
    pub biggest_staker_id: StakerId,
    /// Stake of `biggest_staker_id` when the block was proposed
    pub biggest_stake: Amount,
    /// Cleared by a successful dispute
    pub valid: bool,
    pub timestamp: Timestamp,
}

impl ProposedBlock {
    pub fn from_proposal(
        index: BlockIndex,
        proposer_id: StakerId,
        proposal: &BlockProposal,
        biggest_stake: Amount,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            index,
            proposer_id,
            job_ids: proposal.job_ids.clone(),
            medians: proposal.medians.clone(),
            lower_cutoffs: proposal.lower_cutoffs.clone(),
            higher_cutoffs: proposal.higher_cutoffs.clone(),
            iteration: proposal.iteration,
            biggest_staker_id: proposal.biggest_staker_id,
            biggest_stake,
            valid: true,
            timestamp,
        }
    }

    pub fn position(&self, job_id: AssetId) -> Option<usize> {
        self.job_ids.iter().position(|id| *id == job_id)
    }

    /// `(job_id, median)` pairs in block order
    pub fn results(&self) -> impl Iterator<Item = (AssetId, &Amount)> {
        self.job_ids.iter().copied().zip(self.medians.iter())
    }

    /// Hash over everything the proposer committed to
    pub fn digest(&self, epoch: Epoch) -> Hash {
        let mut parts: Vec<Vec<u8>> = vec![
            epoch.to_be_bytes().to_vec(),
            self.proposer_id.to_be_bytes().to_vec(),
            self.iteration.to_be_bytes().to_vec(),
        ];
        for i in 0..self.job_ids.len() {
            parts.push(self.job_ids[i].to_be_bytes().to_vec());
            parts.push(self.medians[i].to_be_bytes32().to_vec());
            parts.push(self.lower_cutoffs[i].to_be_bytes32().to_vec());
            parts.push(self.higher_cutoffs[i].to_be_bytes32().to_vec());
        }
        let slices: Vec<&[u8]> = parts.iter().map(Vec::as_slice).collect();
        keccak_concat(&slices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal() -> BlockProposal {
        BlockProposal {
            epoch: 1,
            job_ids: vec![1, 2],
            medians: vec![Amount::from_u64(10), Amount::from_u64(20)],
            lower_cutoffs: vec![Amount::from_u64(9), Amount::from_u64(20)],
            higher_cutoffs: vec![Amount::from_u64(11), Amount::from_u64(25)],
            iteration: 0,
            biggest_staker_id: 1,
        }
    }

    #[test]
    fn test_proposal_shape() {
        assert!(proposal().validate().is_ok());

        let mut empty = proposal();
        empty.job_ids.clear();
        assert!(matches!(empty.validate(), Err(ConsensusError::EmptyBlock)));

        let mut short = proposal();
        short.higher_cutoffs.pop();
        assert!(matches!(short.validate(), Err(ConsensusError::LengthMismatch { higher: 1, .. })));

        let mut dup = proposal();
        dup.job_ids[1] = 1;
        assert!(matches!(dup.validate(), Err(ConsensusError::DuplicateJob(1))));

        let mut inverted = proposal();
        inverted.lower_cutoffs[0] = Amount::from_u64(12);
        assert!(matches!(inverted.validate(), Err(ConsensusError::CutoffOrder(1))));
    }

    #[test]
    fn test_digest_covers_results() {
        let block = ProposedBlock::from_proposal(0, 3, &proposal(), Amount::from_u64(5), 0);
        let mut changed = block.clone();
        changed.medians[1] = Amount::from_u64(21);

        assert_eq!(block.digest(1), block.digest(1));
        assert_ne!(block.digest(1), changed.digest(1));
        assert_ne!(block.digest(1), block.digest(2));
        assert_eq!(block.position(2), Some(1));
        assert_eq!(block.results().count(), 2);
    }
}
