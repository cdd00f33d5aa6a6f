// consensus/src/dispute.rs

use crate::{ConsensusError, ConsensusResult, ProposedBlock};
use oracle_core::{reaches_bps, Amount, AssetId, BlockIndex, CoreError, StakerId};
use serde::{Deserialize, Serialize};

/// A disputer's replay of one job's sorted votes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeAccumulator {
    pub job_id: AssetId,
    pub last_value: Option<Amount>,
    pub accumulated_weight: Amount,
    pub lower_cutoff: Option<Amount>,
    pub median: Option<Amount>,
    pub higher_cutoff: Option<Amount>,
}

impl DisputeAccumulator {
    pub fn new(job_id: AssetId) -> Self {
        Self {
            job_id,
            last_value: None,
            accumulated_weight: Amount::zero(),
            lower_cutoff: None,
            median: None,
            higher_cutoff: None,
        }
    }

    /// Feed the next value with the weight revealed behind it.
    ///
    /// Values must keep strictly ascending across calls; each percentile is
    /// the first value whose cumulative weight reaches it.
    pub fn push(
        &mut self,
        value: &Amount,
        weight: &Amount,
        total: &Amount,
        percentiles: (u16, u16, u16),
    ) -> ConsensusResult<()> {
        if matches!(&self.last_value, Some(last) if value <= last) {
            return Err(ConsensusError::UnsortedValues(self.job_id));
        }

        self.accumulated_weight = self
            .accumulated_weight
            .checked_add(weight)
            .ok_or_else(|| CoreError::Overflow("dispute weight".into()))?;
        self.last_value = Some(value.clone());

        let (lower_bps, median_bps, higher_bps) = percentiles;
        let cumulative = &self.accumulated_weight;
        for (slot, bps) in [
            (&mut self.lower_cutoff, lower_bps),
            (&mut self.median, median_bps),
            (&mut self.higher_cutoff, higher_bps),
        ] {
            if slot.is_none() && !weight.is_zero() && reaches_bps(cumulative, total, bps) {
                *slot = Some(value.clone());
            }
        }
        Ok(())
    }

    pub fn is_complete(&self, total: &Amount) -> bool {
        self.accumulated_weight == *total
    }

    /// Whether `block` reports exactly what the replay computed
    pub fn agrees_with(&self, block: &ProposedBlock) -> bool {
        let Some(i) = block.position(self.job_id) else {
            return false;
        };
        self.median.as_ref() == Some(&block.medians[i])
            && self.lower_cutoff.as_ref() == Some(&block.lower_cutoffs[i])
            && self.higher_cutoff.as_ref() == Some(&block.higher_cutoffs[i])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisputeOutcome {
    /// The leading block was wrong and has been invalidated
    Invalidated,
    /// The leading block matched the replay
    Upheld,
}

/// What `reset_dispute` decided, for the caller to settle stake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeResolution {
    pub outcome: DisputeOutcome,
    pub block_index: BlockIndex,
    pub proposer_id: StakerId,
    pub job_id: AssetId,
    pub was_confirmed: bool,
}
