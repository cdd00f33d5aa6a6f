// node/src/oracle.rs

use crate::{OracleError, OracleResult};
use consensus::{
    BlockEngine, BlockProposal, ConsensusError, DisputeOutcome, DisputeResolution, ProposedBlock,
};
use oracle_core::{
    AggregationMethod, Amount, AssetId, Balances, BlockIndex, BlockNumber, CoreError, Epoch,
    EpochClock, EventLog, Moment, Phase, ProtocolConfig, StakerId, Timestamp, Vote, VoteReader,
};
use oracle_crypto::{Address, Hash};
use registry::{Collection, Job, JobSpec, PriorResult, Registry};
use serde::{Deserialize, Serialize};
use staking::{RevealScore, SlashReason, SlashRecord, StakeLedger, Staker};
use std::collections::BTreeMap;
use voting::{RevealRequest, Tally, VoteStore};

/// What a `reveal` call did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevealOutcome {
    /// The staker's votes were recorded with `weight`
    Revealed { staker_id: StakerId, weight: Amount },
    /// A third party proved the staker leaked its secret during the commit phase
    Snitched(SlashRecord),
}

/// What confirming a block wrote, kept until the epoch ends so an
/// invalidating dispute can take it back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedBlock {
    pub block_index: BlockIndex,
    pub proposer_id: StakerId,
    pub priors: Vec<PriorResult>,
}

/// The whole oracle state.
///
/// Built once at genesis; owns every component and hands each operation
/// the others it needs by reference. Every public mutating method is one
/// transaction: it either applies fully or returns an error before
/// touching state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Oracle {
    config: ProtocolConfig,
    clock: EpochClock,
    now: Moment,
    block_time: u64,
    balances: Balances,
    ledger: StakeLedger,
    votes: VoteStore,
    blocks: BlockEngine,
    registry: Registry,
    applied: BTreeMap<Epoch, AppliedBlock>,
    events: EventLog,
}

impl Oracle {
    pub fn new(config: ProtocolConfig, genesis_timestamp: Timestamp) -> OracleResult<Self> {
        config.validate()?;
        let clock = EpochClock::new(config.genesis_height, config.epoch_length)?;
        let now = clock.moment(config.genesis_height, genesis_timestamp)?;

        tracing::info!(
            "✓ Oracle initialized: genesis_height={}, epoch_length={}, min_stake={}",
            config.genesis_height,
            config.epoch_length,
            config.min_stake
        );

        Ok(Self {
            ledger: StakeLedger::new(config.clone()),
            votes: VoteStore::new(),
            blocks: BlockEngine::new(config.clone()),
            registry: Registry::new(config.min_job_credit.clone()),
            applied: BTreeMap::new(),
            balances: Balances::new(),
            events: EventLog::new(),
            block_time: 1,
            clock,
            now,
            config,
        })
    }

    /// Seconds the timestamp moves per height in `advance_blocks`
    pub fn with_block_time(mut self, seconds: u64) -> Self {
        self.block_time = seconds;
        self
    }

    // ----- Clock -----

    pub fn now(&self) -> Moment {
        self.now
    }

    pub fn clock(&self) -> &EpochClock {
        &self.clock
    }

    pub fn advance_to(&mut self, height: BlockNumber, timestamp: Timestamp) -> OracleResult<Moment> {
        if height < self.now.height {
            return Err(OracleError::ClockRewind {
                current: self.now.height,
                requested: height,
            });
        }
        let moment = self.clock.moment(height, timestamp.max(self.now.timestamp))?;
        if moment.epoch != self.now.epoch || moment.phase != self.now.phase {
            tracing::debug!(
                "Clock at height {}: epoch {} {:?}",
                moment.height,
                moment.epoch,
                moment.phase
            );
        }
        self.now = moment;
        Ok(moment)
    }

    pub fn advance_blocks(&mut self, blocks: u64) -> OracleResult<Moment> {
        let height = self.now.height.saturating_add(blocks);
        let timestamp = self
            .now
            .timestamp
            .saturating_add(blocks.saturating_mul(self.block_time));
        self.advance_to(height, timestamp)
    }

    /// Move to the first height of `phase` in `epoch`
    pub fn advance_to_phase(&mut self, epoch: Epoch, phase: Phase) -> OracleResult<Moment> {
        let target = self.clock.height_of(epoch, phase);
        if target < self.now.height {
            return Err(OracleError::ClockRewind {
                current: self.now.height,
                requested: target,
            });
        }
        self.advance_blocks(target - self.now.height)
    }

    // ----- Balances -----

    /// Issue liquid tokens, e.g. genesis allocations
    pub fn mint(&mut self, address: Address, amount: &Amount) -> OracleResult<()> {
        self.events.begin_transaction();
        self.balances.mint(address, amount)?;
        tracing::info!("Minted {} to {}", amount, address);
        Ok(())
    }

    // ----- Stake Ledger -----

    pub fn stake(&mut self, sender: Address, epoch: Epoch, amount: Amount) -> OracleResult<StakerId> {
        self.events.begin_transaction();
        let staker_id = self.ledger.stake(
            sender,
            epoch,
            &amount,
            &self.now,
            &mut self.balances,
            &mut self.events,
        )?;
        Ok(staker_id)
    }

    pub fn unstake(&mut self, sender: Address, epoch: Epoch) -> OracleResult<()> {
        self.events.begin_transaction();
        self.ledger.unstake(sender, epoch, &self.now, &mut self.events)?;
        Ok(())
    }

    pub fn withdraw(&mut self, sender: Address, epoch: Epoch) -> OracleResult<Amount> {
        self.events.begin_transaction();
        let amount =
            self.ledger
                .withdraw(sender, epoch, &self.now, &mut self.balances, &mut self.events)?;
        Ok(amount)
    }

    // ----- Commit-Reveal -----

    /// Record a commitment, first settling the staker's penalties and rewards.
    ///
    /// The settlement is previewed before anything is written so a staker
    /// whose stake would fall below the minimum is rejected untouched.
    pub fn commit(&mut self, sender: Address, epoch: Epoch, commitment: Hash) -> OracleResult<()> {
        self.events.begin_transaction();
        let staker_id = self.staker_id_of(&sender)?;
        self.votes
            .validate_commit(staker_id, epoch, &commitment, &self.now)?;

        let score = self.reveal_score(staker_id);
        let settlement = self
            .ledger
            .preview_settlement(staker_id, &self.now, score.as_ref())?;
        if settlement.stake_after < self.config.min_stake {
            return Err(OracleError::BelowMinimumAfterSettlement {
                required: self.config.min_stake.clone(),
                provided: settlement.stake_after,
            });
        }

        self.ledger
            .give_penalties(staker_id, &self.now, score.as_ref(), &mut self.events)?;
        self.ledger
            .give_rewards(staker_id, &self.now, score.as_ref(), &mut self.events)?;
        self.votes
            .commit(staker_id, epoch, commitment, &self.now, &mut self.events)?;
        self.ledger.mark_committed(staker_id, epoch)?;
        Ok(())
    }

    /// Reveal the votes behind a commitment.
    ///
    /// When `sender` is not the staker, the call is a snitch: during the
    /// commit phase a correct root and secret prove the staker leaked them,
    /// and the staker is slashed with `sender` as bounty hunter.
    pub fn reveal(
        &mut self,
        sender: Address,
        staker_address: Address,
        request: &RevealRequest,
    ) -> OracleResult<RevealOutcome> {
        self.events.begin_transaction();
        let staker_id = self.staker_id_of(&staker_address)?;
        if sender != staker_address {
            return self.snitch(sender, staker_id, staker_address, request);
        }

        let weight = self
            .ledger
            .staker(staker_id)
            .map(|staker| staker.stake.clone())
            .unwrap_or_default();
        self.votes
            .validate_reveal(staker_id, &staker_address, request, &weight, &self.now)?;
        for vote in &request.votes {
            self.require_job(vote.job_id)?;
        }

        self.votes.reveal(
            staker_id,
            &staker_address,
            request,
            weight.clone(),
            &self.now,
            &mut self.events,
        )?;
        self.ledger.mark_revealed(staker_id, request.epoch)?;
        Ok(RevealOutcome::Revealed { staker_id, weight })
    }

    fn snitch(
        &mut self,
        sender: Address,
        staker_id: StakerId,
        staker_address: Address,
        request: &RevealRequest,
    ) -> OracleResult<RevealOutcome> {
        if self.now.phase != Phase::Commit {
            return Err(OracleError::ThirdPartyReveal {
                sender,
                staker: staker_address,
            });
        }
        self.now.require_epoch(request.epoch)?;
        self.votes.check_secret(
            staker_id,
            &staker_address,
            request.epoch,
            &request.root,
            &request.secret,
        )?;

        tracing::warn!(
            "Staker {} leaked its epoch {} secret, reported by {}",
            staker_id,
            request.epoch,
            sender
        );
        let record = self.ledger.slash(
            staker_id,
            sender,
            SlashReason::LeakedSecret,
            &self.now,
            &mut self.balances,
            &mut self.events,
        )?;
        Ok(RevealOutcome::Snitched(record))
    }

    /// How the staker's last reveal scored against its epoch's confirmed block
    fn reveal_score(&self, staker_id: StakerId) -> Option<RevealScore> {
        let epoch = self.ledger.staker(staker_id)?.epoch_last_revealed?;
        let record = self.votes.reveal_record(epoch, staker_id)?;
        let block = self.blocks.confirmed_block(epoch);
        Some(RevealScore {
            epoch,
            weight: record.weight.clone(),
            out_of_bounds: block.map_or(0, |block| self.out_of_bounds(epoch, staker_id, block)),
            confirmed: block.is_some(),
        })
    }

    /// Revealed values outside the block's cutoffs; jobs the block omits don't count
    fn out_of_bounds(&self, epoch: Epoch, staker_id: StakerId, block: &ProposedBlock) -> u64 {
        self.votes
            .votes_of(epoch, staker_id)
            .iter()
            .filter(|(job_id, vote)| {
                block.position(*job_id).map_or(false, |i| {
                    vote.value < block.lower_cutoffs[i] || vote.value > block.higher_cutoffs[i]
                })
            })
            .count() as u64
    }

    // ----- Block Proposal Engine -----

    pub fn is_elected_proposer(
        &self,
        epoch: Epoch,
        iteration: u64,
        biggest_staker_id: StakerId,
        staker_id: StakerId,
    ) -> bool {
        self.blocks
            .is_elected_proposer(epoch, iteration, biggest_staker_id, staker_id, &self.ledger)
    }

    pub fn propose(&mut self, sender: Address, proposal: &BlockProposal) -> OracleResult<BlockIndex> {
        self.events.begin_transaction();
        let proposer_id = self.staker_id_of(&sender)?;
        for job_id in &proposal.job_ids {
            self.require_job(*job_id)?;
        }
        let index = self.blocks.propose(
            proposer_id,
            proposal,
            &self.now,
            &self.ledger,
            &self.votes,
            &mut self.events,
        )?;
        Ok(index)
    }

    /// Confirm the best valid block of `epoch` and apply its results.
    ///
    /// The block is settled before the engine records the confirmation, and
    /// every fallible check runs before the first write, so a failure leaves
    /// the epoch unconfirmed and a retry starts clean.
    pub fn confirm_block(&mut self, epoch: Epoch) -> OracleResult<Option<BlockIndex>> {
        self.events.begin_transaction();
        let Some(index) = self.blocks.next_to_confirm(epoch, &self.now)? else {
            tracing::warn!("No valid block to confirm in epoch {}", epoch);
            return Ok(None);
        };
        let block = self
            .blocks
            .get_block(epoch, index)
            .cloned()
            .ok_or(ConsensusError::BlockNotFound { epoch, index })?;

        let stake_getting_reward = self.stake_getting_reward(epoch, &block)?;
        let priors = self.registry.prior_results(&block.job_ids)?;

        self.ledger.settle_confirmed_block(
            epoch,
            block.proposer_id,
            stake_getting_reward.clone(),
            &self.now,
            &mut self.balances,
            &mut self.events,
        )?;
        let reported = self.apply_results(&block)?;
        self.applied.retain(|applied, _| *applied >= epoch);
        self.applied.insert(
            epoch,
            AppliedBlock {
                block_index: index,
                proposer_id: block.proposer_id,
                priors,
            },
        );
        self.blocks.confirm_block(epoch, &self.now, &mut self.events)?;

        tracing::info!(
            "Epoch {} applied: {} results, {} stake eligible for rewards",
            epoch,
            reported,
            stake_getting_reward
        );
        Ok(Some(index))
    }

    /// Write the block's medians and refresh the collections they feed.
    /// Returns how many job results were stored.
    fn apply_results(&mut self, block: &ProposedBlock) -> OracleResult<usize> {
        let mut reported = Vec::with_capacity(block.job_ids.len());
        for (job_id, median) in block.results() {
            if self
                .registry
                .fulfill_asset(job_id, median.clone(), &self.now, &mut self.events)?
            {
                reported.push(job_id);
            }
        }
        self.registry
            .refresh_collections(&reported, &self.now, &mut self.events)?;
        Ok(reported.len())
    }

    /// Undo what confirming `epoch`'s block wrote: its results, the
    /// proposer's block reward and the reward bucket
    fn revert_block(&mut self, epoch: Epoch) -> OracleResult<()> {
        if let Some(applied) = self.applied.remove(&epoch) {
            self.registry
                .restore_results(&applied.priors, &self.now, &mut self.events)?;
            self.ledger.revoke_block_reward(
                applied.proposer_id,
                &self.now,
                &mut self.balances,
                &mut self.events,
            )?;
        }
        self.ledger.reopen_reward_epoch(epoch)?;
        Ok(())
    }

    /// Reveal weight of every staker whose votes all lie within the block's cutoffs
    fn stake_getting_reward(&self, epoch: Epoch, block: &ProposedBlock) -> OracleResult<Amount> {
        let mut sum = Amount::zero();
        for (staker_id, weight) in self.votes.revealers(epoch) {
            if self.out_of_bounds(epoch, staker_id, block) == 0 {
                sum = sum
                    .checked_add(&weight)
                    .ok_or_else(|| CoreError::Overflow("stake getting reward".into()))?;
            }
        }
        Ok(sum)
    }

    pub fn give_sorted(
        &mut self,
        sender: Address,
        epoch: Epoch,
        job_id: AssetId,
        sorted: &[Amount],
    ) -> OracleResult<()> {
        self.events.begin_transaction();
        let disputer_id = self.staker_id_of(&sender)?;
        self.blocks
            .give_sorted(disputer_id, epoch, job_id, sorted, &self.now, &self.votes)?;
        Ok(())
    }

    pub fn abandon_dispute(&mut self, sender: Address, epoch: Epoch) -> OracleResult<()> {
        self.events.begin_transaction();
        let disputer_id = self.staker_id_of(&sender)?;
        self.blocks.abandon_dispute(disputer_id, epoch)?;
        Ok(())
    }

    /// Settle a completed dispute. An invalidated block costs its proposer
    /// the slash; if it was already confirmed, its results, block reward and
    /// reward bucket are rolled back first.
    pub fn reset_dispute(&mut self, sender: Address, epoch: Epoch) -> OracleResult<DisputeResolution> {
        self.events.begin_transaction();
        let disputer_id = self.staker_id_of(&sender)?;
        let resolution = self.blocks.reset_dispute(
            disputer_id,
            epoch,
            &self.now,
            &self.votes,
            &mut self.events,
        )?;

        if resolution.outcome == DisputeOutcome::Invalidated {
            if resolution.was_confirmed {
                self.revert_block(epoch)?;
            }
            self.ledger.slash(
                resolution.proposer_id,
                sender,
                SlashReason::InvalidBlock,
                &self.now,
                &mut self.balances,
                &mut self.events,
            )?;
        }
        Ok(resolution)
    }

    // ----- Registry -----

    /// Register a job; its credit funds the stakers' reward pool
    pub fn create_job(&mut self, sender: Address, spec: JobSpec, credit: Amount) -> OracleResult<AssetId> {
        self.events.begin_transaction();
        self.ledger.check_reward_funding(&credit)?;
        let id = self.registry.create_job(
            sender,
            spec,
            credit.clone(),
            &self.now,
            &mut self.balances,
            &mut self.events,
        )?;
        self.ledger.fund_reward_pool(&credit)?;
        Ok(id)
    }

    pub fn create_collection(
        &mut self,
        sender: Address,
        name: String,
        aggregation_method: AggregationMethod,
        job_ids: Vec<AssetId>,
        credit: Amount,
    ) -> OracleResult<AssetId> {
        self.events.begin_transaction();
        self.ledger.check_reward_funding(&credit)?;
        let id = self.registry.create_collection(
            sender,
            name,
            aggregation_method,
            job_ids,
            credit.clone(),
            &self.now,
            &mut self.balances,
            &mut self.events,
        )?;
        self.ledger.fund_reward_pool(&credit)?;
        Ok(id)
    }

    pub fn add_job_to_collection(
        &mut self,
        sender: Address,
        collection_id: AssetId,
        job_id: AssetId,
    ) -> OracleResult<()> {
        self.events.begin_transaction();
        self.registry
            .add_job_to_collection(sender, collection_id, job_id, &self.now, &mut self.events)?;
        Ok(())
    }

    fn require_job(&self, id: AssetId) -> OracleResult<()> {
        if self.registry.is_job(id) {
            Ok(())
        } else {
            Err(OracleError::UnknownJob(id))
        }
    }

    fn staker_id_of(&self, address: &Address) -> OracleResult<StakerId> {
        self.ledger
            .staker_id(address)
            .ok_or(OracleError::UnknownStaker(*address))
    }

    // ----- Accessors -----

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn get_staker(&self, staker_id: StakerId) -> Option<&Staker> {
        self.ledger.staker(staker_id)
    }

    pub fn staker_id(&self, address: &Address) -> Option<StakerId> {
        self.ledger.staker_id(address)
    }

    pub fn get_vote(&self, epoch: Epoch, staker_id: StakerId, job_id: AssetId) -> Option<Vote> {
        self.votes.vote(epoch, staker_id, job_id)
    }

    pub fn total_stake_revealed(&self, epoch: Epoch, job_id: AssetId) -> Amount {
        self.votes.total_stake_revealed(epoch, job_id)
    }

    pub fn tally(&self, epoch: Epoch, job_id: AssetId) -> Option<Tally> {
        self.votes.tally(epoch, job_id, &self.config)
    }

    pub fn get_block(&self, epoch: Epoch, index: BlockIndex) -> Option<&ProposedBlock> {
        self.blocks.get_block(epoch, index)
    }

    pub fn get_num_proposed_blocks(&self, epoch: Epoch) -> usize {
        self.blocks.num_proposed_blocks(epoch)
    }

    pub fn confirmed_block(&self, epoch: Epoch) -> Option<&ProposedBlock> {
        self.blocks.confirmed_block(epoch)
    }

    pub fn epoch_seed(&self, epoch: Epoch) -> Hash {
        self.blocks.epoch_seed(epoch)
    }

    pub fn get_job(&self, id: AssetId) -> Option<&Job> {
        self.registry.get_job(id)
    }

    pub fn get_collection(&self, id: AssetId) -> Option<&Collection> {
        self.registry.get_collection(id)
    }

    pub fn get_result(&self, id: AssetId) -> Option<&Amount> {
        self.registry.get_result(id)
    }

    pub fn balance_of(&self, address: &Address) -> Amount {
        self.balances.balance_of(address)
    }

    pub fn balances(&self) -> &Balances {
        &self.balances
    }

    pub fn ledger(&self) -> &StakeLedger {
        &self.ledger
    }

    pub fn votes(&self) -> &VoteStore {
        &self.votes
    }

    pub fn blocks(&self) -> &BlockEngine {
        &self.blocks
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Results the confirmed block of `epoch` overwrote, while it can still be disputed
    pub fn applied_block(&self, epoch: Epoch) -> Option<&AppliedBlock> {
        self.applied.get(&epoch)
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }
}
