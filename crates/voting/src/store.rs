// voting/src/store.rs

use crate::{commitment_hash, RevealRequest, VotingError, VotingResult};
use oracle_core::{
    aggregate, weighted_percentile, AggregationMethod, Amount, AssetId, CoreError, Epoch, EventLog, Moment,
    OracleEvent, Phase, ProtocolConfig, StakerId, Vote, VoteReader,
};
use oracle_crypto::{Address, Hash};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What a successful reveal left behind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealRecord {
    pub root: Hash,
    pub weight: Amount,
    pub job_ids: Vec<AssetId>,
}

/// Stake-weighted summary of one job's votes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub median: Amount,
    pub lower_cutoff: Amount,
    pub higher_cutoff: Amount,
    pub total_weight: Amount,
}

impl Tally {
    pub fn within_cutoffs(&self, value: &Amount) -> bool {
        *value >= self.lower_cutoff && *value <= self.higher_cutoff
    }
}

/// Commitments, reveals and accumulated weights, keyed by epoch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoteStore {
    commitments: BTreeMap<(Epoch, StakerId), Hash>,
    reveals: BTreeMap<(Epoch, StakerId), RevealRecord>,
    votes: BTreeMap<(Epoch, StakerId, AssetId), Vote>,
    /// value -> accumulated weight, ordered by value
    vote_weights: BTreeMap<(Epoch, AssetId), BTreeMap<Amount, Amount>>,
    total_stake_revealed: BTreeMap<(Epoch, AssetId), Amount>,
}

impl VoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks `commit` would run without touching state
    pub fn validate_commit(
        &self,
        staker_id: StakerId,
        epoch: Epoch,
        commitment: &Hash,
        now: &Moment,
    ) -> VotingResult<()> {
        now.require_epoch(epoch)?;
        now.require_phase("commit", &[Phase::Commit])?;
        if commitment.is_zero() {
            return Err(VotingError::EmptyCommitment);
        }
        if self.commitments.contains_key(&(epoch, staker_id)) {
            return Err(VotingError::AlreadyCommitted { epoch, staker_id });
        }
        Ok(())
    }

    pub fn commit(
        &mut self,
        staker_id: StakerId,
        epoch: Epoch,
        commitment: Hash,
        now: &Moment,
        events: &mut EventLog,
    ) -> VotingResult<()> {
        self.validate_commit(staker_id, epoch, &commitment, now)?;
        self.commitments.insert((epoch, staker_id), commitment);

        tracing::info!("Staker {} committed {} in epoch {}", staker_id, commitment, epoch);

        events.emit(
            now,
            OracleEvent::Committed {
                epoch,
                staker_id,
                commitment,
                timestamp: now.timestamp,
            },
        );
        Ok(())
    }

    /// Recompute the commitment from a disclosed root and secret
    pub fn check_secret(
        &self,
        staker_id: StakerId,
        staker_address: &Address,
        epoch: Epoch,
        root: &Hash,
        secret: &Hash,
    ) -> VotingResult<()> {
        let stored = self
            .commitments
            .get(&(epoch, staker_id))
            .ok_or(VotingError::NotCommitted { epoch, staker_id })?;
        if commitment_hash(root, secret, staker_address) != *stored {
            return Err(VotingError::CommitmentMismatch { epoch, staker_id });
        }
        Ok(())
    }

    /// Checks `reveal` would run without touching state
    pub fn validate_reveal(
        &self,
        staker_id: StakerId,
        staker_address: &Address,
        request: &RevealRequest,
        weight: &Amount,
        now: &Moment,
    ) -> VotingResult<()> {
        let epoch = request.epoch;
        now.require_epoch(epoch)?;
        if now.phase == Phase::Commit {
            return Err(VotingError::EarlyReveal(epoch));
        }
        now.require_phase("reveal", &[Phase::Reveal])?;

        if request.votes.is_empty() {
            return Err(VotingError::EmptyReveal);
        }
        if request.votes.len() != request.proofs.len() {
            return Err(VotingError::LengthMismatch {
                values: request.votes.len(),
                proofs: request.proofs.len(),
            });
        }
        let mut seen = BTreeSet::new();
        for vote in &request.votes {
            if !seen.insert(vote.job_id) {
                return Err(VotingError::DuplicateJob(vote.job_id));
            }
        }
        if weight.is_zero() {
            return Err(VotingError::ZeroWeight);
        }
        if self.reveals.contains_key(&(epoch, staker_id)) {
            return Err(VotingError::AlreadyRevealed { epoch, staker_id });
        }

        self.check_secret(staker_id, staker_address, epoch, &request.root, &request.secret)?;

        for (vote, proof) in request.votes.iter().zip(&request.proofs) {
            if !proof.verify(request.root, vote.leaf()) {
                return Err(VotingError::InvalidProof { job_id: vote.job_id });
            }
        }
        Ok(())
    }

    /// Disclose the committed votes; each one is weighted by `weight`
    pub fn reveal(
        &mut self,
        staker_id: StakerId,
        staker_address: &Address,
        request: &RevealRequest,
        weight: Amount,
        now: &Moment,
        events: &mut EventLog,
    ) -> VotingResult<()> {
        self.validate_reveal(staker_id, staker_address, request, &weight, now)?;
        let epoch = request.epoch;

        // Sum first so an overflow leaves every tally untouched
        let mut sums = Vec::with_capacity(request.votes.len());
        for vote in &request.votes {
            let key = (epoch, vote.job_id);
            let bucket = self
                .vote_weights
                .get(&key)
                .and_then(|weights| weights.get(&vote.value))
                .cloned()
                .unwrap_or_default()
                .checked_add(&weight)
                .ok_or_else(|| CoreError::Overflow(format!("vote weight of job {}", vote.job_id)))?;
            let total = self
                .total_stake_revealed
                .get(&key)
                .cloned()
                .unwrap_or_default()
                .checked_add(&weight)
                .ok_or_else(|| CoreError::Overflow(format!("revealed stake of job {}", vote.job_id)))?;
            sums.push((key, bucket, total));
        }

        for (vote, (key, bucket, total)) in request.votes.iter().zip(sums) {
            self.vote_weights
                .entry(key)
                .or_default()
                .insert(vote.value.clone(), bucket);
            self.total_stake_revealed.insert(key, total);
            self.votes.insert(
                (epoch, staker_id, vote.job_id),
                Vote {
                    value: vote.value.clone(),
                    weight: weight.clone(),
                },
            );
        }

        self.reveals.insert(
            (epoch, staker_id),
            RevealRecord {
                root: request.root,
                weight: weight.clone(),
                job_ids: request.votes.iter().map(|v| v.job_id).collect(),
            },
        );

        tracing::info!(
            "Staker {} revealed {} votes in epoch {} with weight {}",
            staker_id,
            request.votes.len(),
            epoch,
            weight
        );

        events.emit(
            now,
            OracleEvent::Revealed {
                epoch,
                staker_id,
                root: request.root,
                weight,
                votes: request.votes.clone(),
                timestamp: now.timestamp,
            },
        );
        Ok(())
    }

    pub fn commitment(&self, epoch: Epoch, staker_id: StakerId) -> Option<&Hash> {
        self.commitments.get(&(epoch, staker_id))
    }

    pub fn has_committed(&self, epoch: Epoch, staker_id: StakerId) -> bool {
        self.commitments.contains_key(&(epoch, staker_id))
    }

    pub fn reveal_record(&self, epoch: Epoch, staker_id: StakerId) -> Option<&RevealRecord> {
        self.reveals.get(&(epoch, staker_id))
    }

    /// Votes a staker revealed in `epoch`, by job
    pub fn votes_of(&self, epoch: Epoch, staker_id: StakerId) -> Vec<(AssetId, Vote)> {
        self.votes
            .range((epoch, staker_id, AssetId::MIN)..=(epoch, staker_id, AssetId::MAX))
            .map(|(&(_, _, job_id), vote)| (job_id, vote.clone()))
            .collect()
    }

    /// Every staker that revealed in `epoch` with its reveal weight
    pub fn revealers(&self, epoch: Epoch) -> Vec<(StakerId, Amount)> {
        self.reveals
            .range((epoch, StakerId::MIN)..=(epoch, StakerId::MAX))
            .map(|(&(_, staker_id), record)| (staker_id, record.weight.clone()))
            .collect()
    }

    /// Jobs with at least one revealed vote in `epoch`
    pub fn revealed_jobs(&self, epoch: Epoch) -> Vec<AssetId> {
        self.total_stake_revealed
            .range((epoch, AssetId::MIN)..=(epoch, AssetId::MAX))
            .map(|(&(_, job_id), _)| job_id)
            .collect()
    }

    /// Ordered value -> weight map for one job
    pub fn weights(&self, epoch: Epoch, job_id: AssetId) -> Option<&BTreeMap<Amount, Amount>> {
        self.vote_weights.get(&(epoch, job_id))
    }

    /// Weighted median and cutoffs at the configured percentiles
    pub fn tally(&self, epoch: Epoch, job_id: AssetId, config: &ProtocolConfig) -> Option<Tally> {
        let weights = self.weights(epoch, job_id)?;
        Some(Tally {
            median: weighted_percentile(weights, ProtocolConfig::MEDIAN_BPS)?,
            lower_cutoff: weighted_percentile(weights, config.lower_cutoff_bps)?,
            higher_cutoff: weighted_percentile(weights, config.higher_cutoff_bps)?,
            total_weight: self.total_stake_revealed(epoch, job_id),
        })
    }

    pub fn aggregate(
        &self,
        epoch: Epoch,
        job_id: AssetId,
        method: AggregationMethod,
    ) -> Option<Amount> {
        aggregate(method, self.weights(epoch, job_id)?)
    }
}

impl VoteReader for VoteStore {
    fn vote(&self, epoch: Epoch, staker_id: StakerId, job_id: AssetId) -> Option<Vote> {
        self.votes.get(&(epoch, staker_id, job_id)).cloned()
    }

    fn vote_weight(&self, epoch: Epoch, job_id: AssetId, value: &Amount) -> Amount {
        self.vote_weights
            .get(&(epoch, job_id))
            .and_then(|weights| weights.get(value))
            .cloned()
            .unwrap_or_default()
    }

    fn total_stake_revealed(&self, epoch: Epoch, job_id: AssetId) -> Amount {
        self.total_stake_revealed
            .get(&(epoch, job_id))
            .cloned()
            .unwrap_or_default()
    }

    fn has_revealed(&self, epoch: Epoch, staker_id: StakerId) -> bool {
        self.reveals.contains_key(&(epoch, staker_id))
    }
}
