// consensus/src/engine.rs

use crate::{
    selection, BlockProposal, ConsensusError, ConsensusResult, DisputeAccumulator, DisputeOutcome,
    DisputeResolution, ProposedBlock,
};
use oracle_core::{
    Amount, AssetId, BlockIndex, Epoch, EventLog, Moment, OracleEvent, Phase, ProtocolConfig,
    StakeReader, StakerId, VoteReader,
};
use oracle_crypto::Hash;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Candidate blocks, confirmations and open disputes, keyed by epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockEngine {
    config: ProtocolConfig,
    blocks: BTreeMap<Epoch, Vec<ProposedBlock>>,
    proposers: BTreeSet<(Epoch, StakerId)>,
    confirmed: BTreeMap<Epoch, BlockIndex>,
    /// Digest of each epoch's confirmed block, feeding later seeds
    digests: BTreeMap<Epoch, Hash>,
    disputes: BTreeMap<(Epoch, StakerId), DisputeAccumulator>,
}

impl BlockEngine {
    pub fn new(config: ProtocolConfig) -> Self {
        Self {
            config,
            blocks: BTreeMap::new(),
            proposers: BTreeSet::new(),
            confirmed: BTreeMap::new(),
            digests: BTreeMap::new(),
            disputes: BTreeMap::new(),
        }
    }

    pub fn epoch_seed(&self, epoch: Epoch) -> Hash {
        let previous = self
            .digests
            .range(..epoch)
            .next_back()
            .map(|(_, digest)| *digest)
            .unwrap_or(self.config.genesis_seed);
        selection::epoch_seed(epoch, &previous)
    }

    /// Pure eligibility check for `staker_id` at `iteration` of `epoch`
    pub fn is_elected_proposer<S: StakeReader>(
        &self,
        epoch: Epoch,
        iteration: u64,
        biggest_staker_id: StakerId,
        staker_id: StakerId,
        stakes: &S,
    ) -> bool {
        let (Some(stake), Some(biggest_stake), Some(ledger_biggest)) = (
            stakes.stake_of(staker_id),
            stakes.stake_of(biggest_staker_id),
            stakes.biggest_stake(),
        ) else {
            return false;
        };
        // Naming a smaller staker as the biggest would inflate the odds
        biggest_stake == ledger_biggest
            && biggest_stake >= stake
            && selection::is_elected(
                &self.epoch_seed(epoch),
                iteration,
                stakes.num_stakers(),
                staker_id,
                &stake,
                &biggest_stake,
            )
    }

    /// Append a candidate block for the proposal's epoch
    pub fn propose<S: StakeReader, V: VoteReader>(
        &mut self,
        proposer_id: StakerId,
        proposal: &BlockProposal,
        now: &Moment,
        stakes: &S,
        votes: &V,
        events: &mut EventLog,
    ) -> ConsensusResult<BlockIndex> {
        let epoch = proposal.epoch;
        now.require_epoch(epoch)?;
        now.require_phase("propose", &[Phase::Propose])?;

        let stake = stakes
            .stake_of(proposer_id)
            .ok_or(ConsensusError::StakerNotFound(proposer_id))?;
        if stake.is_zero() || stake < self.config.min_stake {
            return Err(ConsensusError::InsufficientStake {
                required: self.config.min_stake.clone(),
                provided: stake,
            });
        }
        if !votes.has_revealed(epoch, proposer_id) {
            return Err(ConsensusError::NotRevealed {
                epoch,
                staker_id: proposer_id,
            });
        }
        if self.proposers.contains(&(epoch, proposer_id)) {
            return Err(ConsensusError::AlreadyProposed {
                epoch,
                staker_id: proposer_id,
            });
        }

        let biggest_stake = stakes
            .stake_of(proposal.biggest_staker_id)
            .ok_or(ConsensusError::StakerNotFound(proposal.biggest_staker_id))?;
        let ledger_biggest = stakes.biggest_stake().unwrap_or_default();
        if biggest_stake < stake || biggest_stake < ledger_biggest {
            return Err(ConsensusError::NotBiggestStaker {
                biggest_staker_id: proposal.biggest_staker_id,
            });
        }
        if !self.is_elected_proposer(
            epoch,
            proposal.iteration,
            proposal.biggest_staker_id,
            proposer_id,
            stakes,
        ) {
            return Err(ConsensusError::NotElected {
                staker_id: proposer_id,
                iteration: proposal.iteration,
            });
        }
        proposal.validate()?;

        let blocks = self.blocks.entry(epoch).or_default();
        let index = blocks.len();
        let block = ProposedBlock::from_proposal(
            index,
            proposer_id,
            proposal,
            biggest_stake.clone(),
            now.timestamp,
        );
        blocks.push(block);
        self.proposers.insert((epoch, proposer_id));

        tracing::info!(
            "Staker {} proposed block {} for epoch {} at iteration {} ({} jobs)",
            proposer_id,
            index,
            epoch,
            proposal.iteration,
            proposal.job_ids.len()
        );

        events.emit(
            now,
            OracleEvent::Proposed {
                epoch,
                block_index: index,
                staker_id: proposer_id,
                job_ids: proposal.job_ids.clone(),
                medians: proposal.medians.clone(),
                lower_cutoffs: proposal.lower_cutoffs.clone(),
                higher_cutoffs: proposal.higher_cutoffs.clone(),
                iteration: proposal.iteration,
                biggest_staker_id: proposal.biggest_staker_id,
                biggest_stake,
                timestamp: now.timestamp,
            },
        );

        Ok(index)
    }

    /// Block indices, strongest claim first
    pub fn ranking(&self, epoch: Epoch) -> Vec<BlockIndex> {
        let blocks = self.blocks(epoch);
        let mut order: Vec<BlockIndex> = (0..blocks.len()).collect();
        order.sort_by(|&a, &b| {
            let (a, b) = (&blocks[a], &blocks[b]);
            a.iteration
                .cmp(&b.iteration)
                .then_with(|| b.biggest_stake.cmp(&a.biggest_stake))
                .then_with(|| a.index.cmp(&b.index))
        });
        order
    }

    fn top_valid(&self, epoch: Epoch) -> Option<BlockIndex> {
        let blocks = self.blocks(epoch);
        self.ranking(epoch).into_iter().find(|&i| blocks[i].valid)
    }

    /// The confirmed block, else the best valid candidate
    pub fn leading_block(&self, epoch: Epoch) -> Option<BlockIndex> {
        self.confirmed_index(epoch).or_else(|| self.top_valid(epoch))
    }

    /// The block `confirm_block` would pick, checked without confirming it.
    /// `Ok(None)` when no candidate is valid.
    pub fn next_to_confirm(&self, epoch: Epoch, now: &Moment) -> ConsensusResult<Option<BlockIndex>> {
        now.require_epoch(epoch)?;
        now.require_phase("confirm_block", &[Phase::Confirm])?;
        if let Some(block_index) = self.confirmed_index(epoch) {
            return Err(ConsensusError::AlreadyConfirmed { epoch, block_index });
        }
        Ok(self.top_valid(epoch))
    }

    /// Confirm the top-ranked valid block. `Ok(None)` when no candidate is valid.
    ///
    /// Disputes and proposer marks of earlier epochs can no longer be used
    /// and are dropped here.
    pub fn confirm_block(
        &mut self,
        epoch: Epoch,
        now: &Moment,
        events: &mut EventLog,
    ) -> ConsensusResult<Option<BlockIndex>> {
        let Some(index) = self.next_to_confirm(epoch, now)? else {
            tracing::warn!("No valid block to confirm in epoch {}", epoch);
            return Ok(None);
        };

        self.disputes.retain(|(disputed, _), _| *disputed >= epoch);
        self.proposers.retain(|(proposed, _)| *proposed >= epoch);

        let block = &self.blocks[&epoch][index];
        let digest = block.digest(epoch);
        self.confirmed.insert(epoch, index);
        self.digests.insert(epoch, digest);

        tracing::info!(
            "Confirmed block {} of epoch {} from staker {}",
            index,
            epoch,
            block.proposer_id
        );

        events.emit(
            now,
            OracleEvent::BlockConfirmed {
                epoch,
                block_index: index,
                proposer_id: block.proposer_id,
                job_ids: block.job_ids.clone(),
                medians: block.medians.clone(),
                timestamp: now.timestamp,
            },
        );

        Ok(Some(index))
    }

    /// Feed the next strictly ascending slice of one job's revealed values
    pub fn give_sorted<V: VoteReader>(
        &mut self,
        disputer_id: StakerId,
        epoch: Epoch,
        job_id: AssetId,
        sorted: &[Amount],
        now: &Moment,
        votes: &V,
    ) -> ConsensusResult<()> {
        now.require_epoch(epoch)?;
        now.require_phase("give_sorted", &[Phase::Dispute])?;
        if sorted.is_empty() {
            return Err(ConsensusError::EmptyValues(job_id));
        }

        let total = votes.total_stake_revealed(epoch, job_id);
        if total.is_zero() {
            return Err(ConsensusError::NoVotes(job_id));
        }

        let mut accumulator = match self.disputes.get(&(epoch, disputer_id)) {
            Some(existing) if existing.job_id != job_id => {
                return Err(ConsensusError::DisputeJobMismatch {
                    expected: existing.job_id,
                    provided: job_id,
                })
            }
            Some(existing) => existing.clone(),
            None => DisputeAccumulator::new(job_id),
        };

        let percentiles = (
            self.config.lower_cutoff_bps,
            ProtocolConfig::MEDIAN_BPS,
            self.config.higher_cutoff_bps,
        );
        for value in sorted {
            let weight = votes.vote_weight(epoch, job_id, value);
            accumulator.push(value, &weight, &total, percentiles)?;
        }

        tracing::debug!(
            "Staker {} disputing job {} in epoch {}: {} of {} accumulated",
            disputer_id,
            job_id,
            epoch,
            accumulator.accumulated_weight,
            total
        );
        self.disputes.insert((epoch, disputer_id), accumulator);
        Ok(())
    }

    /// Drop the caller's partial dispute
    pub fn abandon_dispute(&mut self, disputer_id: StakerId, epoch: Epoch) -> ConsensusResult<()> {
        self.disputes
            .remove(&(epoch, disputer_id))
            .map(|_| ())
            .ok_or(ConsensusError::NoDispute { epoch, disputer_id })
    }

    /// Judge the leading block against a complete replay.
    ///
    /// A mismatch invalidates (and un-confirms) the block but is not an
    /// error; the caller settles the proposer's stake from the resolution.
    pub fn reset_dispute<V: VoteReader>(
        &mut self,
        disputer_id: StakerId,
        epoch: Epoch,
        now: &Moment,
        votes: &V,
        events: &mut EventLog,
    ) -> ConsensusResult<DisputeResolution> {
        now.require_epoch(epoch)?;
        now.require_phase("reset_dispute", &[Phase::Dispute, Phase::Confirm])?;

        let accumulator = self
            .disputes
            .get(&(epoch, disputer_id))
            .ok_or(ConsensusError::NoDispute { epoch, disputer_id })?;
        let total = votes.total_stake_revealed(epoch, accumulator.job_id);
        if !accumulator.is_complete(&total) {
            return Err(ConsensusError::IncompleteDispute {
                accumulated: accumulator.accumulated_weight.clone(),
                total,
            });
        }
        let index = self
            .leading_block(epoch)
            .ok_or(ConsensusError::NoBlockToDispute(epoch))?;

        let job_id = accumulator.job_id;
        let agrees = accumulator.agrees_with(&self.blocks[&epoch][index]);
        self.disputes.remove(&(epoch, disputer_id));

        let was_confirmed = self.confirmed_index(epoch) == Some(index);
        let block = self
            .blocks
            .get_mut(&epoch)
            .and_then(|blocks| blocks.get_mut(index))
            .ok_or(ConsensusError::BlockNotFound { epoch, index })?;
        let proposer_id = block.proposer_id;

        if agrees {
            tracing::info!(
                "Dispute by staker {} on job {} upheld block {} of epoch {}",
                disputer_id,
                job_id,
                index,
                epoch
            );
            return Ok(DisputeResolution {
                outcome: DisputeOutcome::Upheld,
                block_index: index,
                proposer_id,
                job_id,
                was_confirmed,
            });
        }

        block.valid = false;
        if was_confirmed {
            self.confirmed.remove(&epoch);
            self.digests.remove(&epoch);
        }

        tracing::warn!(
            "Block {} of epoch {} by staker {} invalidated on job {} (disputer {})",
            index,
            epoch,
            proposer_id,
            job_id,
            disputer_id
        );

        events.emit(
            now,
            OracleEvent::BlockDisputed {
                epoch,
                block_index: index,
                proposer_id,
                disputer_id,
                job_id,
                was_confirmed,
                timestamp: now.timestamp,
            },
        );

        Ok(DisputeResolution {
            outcome: DisputeOutcome::Invalidated,
            block_index: index,
            proposer_id,
            job_id,
            was_confirmed,
        })
    }

    pub fn blocks(&self, epoch: Epoch) -> &[ProposedBlock] {
        self.blocks.get(&epoch).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get_block(&self, epoch: Epoch, index: BlockIndex) -> Option<&ProposedBlock> {
        self.blocks(epoch).get(index)
    }

    pub fn num_proposed_blocks(&self, epoch: Epoch) -> usize {
        self.blocks(epoch).len()
    }

    pub fn confirmed_index(&self, epoch: Epoch) -> Option<BlockIndex> {
        self.confirmed.get(&epoch).copied()
    }

    pub fn confirmed_block(&self, epoch: Epoch) -> Option<&ProposedBlock> {
        self.confirmed_index(epoch)
            .and_then(|index| self.get_block(epoch, index))
    }

    pub fn has_proposed(&self, epoch: Epoch, staker_id: StakerId) -> bool {
        self.proposers.contains(&(epoch, staker_id))
    }

    pub fn dispute(&self, epoch: Epoch, disputer_id: StakerId) -> Option<&DisputeAccumulator> {
        self.disputes.get(&(epoch, disputer_id))
    }
}
