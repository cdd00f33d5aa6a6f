// node/src/client.rs

//! Staker-side helpers: everything a client computes off-ledger before
//! submitting a transaction.

use crate::Oracle;
use consensus::{find_iteration, BlockProposal};
use oracle_core::{Amount, AssetId, Epoch, JobVote, StakeReader, StakerId};
use oracle_crypto::{Address, Hash};
use rand::Rng;
use voting::{RevealBatch, RevealRequest, VotingResult};

/// Keeps a staker's votes and secret between its commit and its reveal
#[derive(Debug, Clone)]
pub struct StakerClient {
    address: Address,
    pending: Option<PendingReveal>,
}

#[derive(Debug, Clone)]
struct PendingReveal {
    epoch: Epoch,
    batch: RevealBatch,
    secret: Hash,
}

impl StakerClient {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            pending: None,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Build the Merkle batch for `votes` under a fresh secret and return
    /// the commitment to submit
    pub fn prepare_commit<R: Rng>(
        &mut self,
        epoch: Epoch,
        votes: Vec<JobVote>,
        rng: &mut R,
    ) -> VotingResult<Hash> {
        let mut secret = [0u8; 32];
        rng.fill(&mut secret[..]);
        let secret = Hash::new(secret);

        let batch = RevealBatch::new(votes)?;
        let commitment = batch.commitment(&secret, &self.address);
        self.pending = Some(PendingReveal {
            epoch,
            batch,
            secret,
        });
        Ok(commitment)
    }

    /// The reveal for `epoch`, if this client committed in it
    pub fn reveal_request(&self, epoch: Epoch) -> VotingResult<Option<RevealRequest>> {
        match &self.pending {
            Some(pending) if pending.epoch == epoch => {
                pending.batch.request(epoch, pending.secret).map(Some)
            }
            _ => Ok(None),
        }
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }
}

/// First iteration at which `staker_id` wins the election of `epoch`
pub fn election_iteration(oracle: &Oracle, staker_id: StakerId, epoch: Epoch) -> Option<u64> {
    let (_, biggest_stake) = oracle.ledger().biggest_staker()?;
    let stake = oracle.ledger().stake_of(staker_id)?;
    find_iteration(
        &oracle.epoch_seed(epoch),
        oracle.ledger().num_stakers(),
        staker_id,
        &stake,
        &biggest_stake,
        oracle.config().max_election_iterations,
    )
}

/// The block an honest `staker_id` would propose: every revealed job with
/// the stake-weighted median and cutoffs of its votes
pub fn honest_proposal(oracle: &Oracle, staker_id: StakerId, epoch: Epoch) -> Option<BlockProposal> {
    let iteration = election_iteration(oracle, staker_id, epoch)?;
    let (biggest_staker_id, _) = oracle.ledger().biggest_staker()?;

    let mut proposal = BlockProposal {
        epoch,
        job_ids: Vec::new(),
        medians: Vec::new(),
        lower_cutoffs: Vec::new(),
        higher_cutoffs: Vec::new(),
        iteration,
        biggest_staker_id,
    };
    for job_id in oracle.votes().revealed_jobs(epoch) {
        let Some(tally) = oracle.tally(epoch, job_id) else {
            continue;
        };
        proposal.job_ids.push(job_id);
        proposal.medians.push(tally.median);
        proposal.lower_cutoffs.push(tally.lower_cutoff);
        proposal.higher_cutoffs.push(tally.higher_cutoff);
    }

    if proposal.job_ids.is_empty() {
        None
    } else {
        Some(proposal)
    }
}

/// Distinct revealed values of one job in ascending order, ready for `give_sorted`
pub fn sorted_values(oracle: &Oracle, epoch: Epoch, job_id: AssetId) -> Vec<Amount> {
    oracle
        .votes()
        .weights(epoch, job_id)
        .map(|weights| weights.keys().cloned().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_reveal_request_matches_commitment() {
        let address = Address::derive(b"alice");
        let mut client = StakerClient::new(address);
        let mut rng = StdRng::seed_from_u64(1);

        let commitment = client
            .prepare_commit(3, vec![JobVote::new(1, 10u64), JobVote::new(2, 20u64)], &mut rng)
            .unwrap();
        let request = client.reveal_request(3).unwrap().unwrap();

        assert_eq!(request.proofs.len(), 2);
        assert_eq!(
            voting::commitment_hash(&request.root, &request.secret, &address),
            commitment
        );
        assert!(client.reveal_request(4).unwrap().is_none());

        client.clear();
        assert!(client.reveal_request(3).unwrap().is_none());
    }

    #[test]
    fn test_secrets_differ_between_commits() {
        let mut client = StakerClient::new(Address::derive(b"alice"));
        let mut rng = StdRng::seed_from_u64(9);
        let votes = vec![JobVote::new(1, 10u64)];

        let first = client.prepare_commit(0, votes.clone(), &mut rng).unwrap();
        let second = client.prepare_commit(0, votes, &mut rng).unwrap();
        assert_ne!(first, second);
    }
}
