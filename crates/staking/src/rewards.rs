// staking/src/rewards.rs

use crate::{RevealScore, StakeLedger, StakingError, StakingResult};
use oracle_core::{
    Amount, Balances, Epoch, EventLog, Moment, OracleEvent, StakeChangeReason, StakerId,
};
use serde::{Deserialize, Serialize};

/// Rewards set aside when an epoch's block is confirmed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardBucket {
    /// Reward pool at confirmation
    pub pool: Amount,
    /// Reveal weight of every staker whose votes all landed inside the cutoffs
    pub stake_getting_reward: Amount,
    /// Already paid out
    pub paid: Amount,
}

impl RewardBucket {
    pub fn remaining(&self) -> Amount {
        self.pool.saturating_sub(&self.paid)
    }
}

impl StakeLedger {
    /// Fails when `amount` would not fit in the reward pool
    pub fn check_reward_funding(&self, amount: &Amount) -> StakingResult<Amount> {
        self.reward_pool
            .checked_add(amount)
            .ok_or_else(|| StakingError::Overflow("reward pool".into()))
    }

    /// Add job or collection credits to the reward pool
    pub fn fund_reward_pool(&mut self, amount: &Amount) -> StakingResult<()> {
        self.reward_pool = self.check_reward_funding(amount)?;
        Ok(())
    }

    /// Move the reward pool into `epoch`'s bucket once its block is confirmed.
    ///
    /// Without any accurate revealer the pool stays for a later epoch.
    pub fn close_reward_epoch(&mut self, epoch: Epoch, stake_getting_reward: Amount) -> StakingResult<()> {
        self.reopen_reward_epoch(epoch)?;
        if stake_getting_reward.is_zero() {
            return Ok(());
        }

        let pool = std::mem::take(&mut self.reward_pool);
        tracing::info!(
            "Closed reward epoch {} with pool {} over stake {}",
            epoch,
            pool,
            stake_getting_reward
        );
        self.reward_buckets.insert(
            epoch,
            RewardBucket {
                pool,
                stake_getting_reward,
                paid: Amount::zero(),
            },
        );
        Ok(())
    }

    /// Return what is left of `epoch`'s bucket to the pool, after its block was disputed
    pub fn reopen_reward_epoch(&mut self, epoch: Epoch) -> StakingResult<()> {
        let Some(bucket) = self.reward_buckets.get(&epoch) else {
            return Ok(());
        };
        self.reward_pool = self
            .reward_pool
            .checked_add(&bucket.remaining())
            .ok_or_else(|| StakingError::Overflow("reward pool".into()))?;
        self.reward_buckets.remove(&epoch);
        Ok(())
    }

    /// Buckets whose claim window has passed by `epoch`
    fn expired_reward_epochs(&self, epoch: Epoch) -> Vec<Epoch> {
        let window = self.config.reward_claim_epochs;
        self.reward_buckets
            .keys()
            .copied()
            .filter(|closed| closed.saturating_add(window) < epoch)
            .collect()
    }

    /// Return unclaimed rewards of expired buckets to the pool and forget
    /// block rewards of past epochs. Returns the amount swept.
    pub fn sweep_reward_epochs(&mut self, epoch: Epoch) -> StakingResult<Amount> {
        let expired = self.expired_reward_epochs(epoch);
        let mut swept = Amount::zero();
        for closed in &expired {
            if let Some(bucket) = self.reward_buckets.get(closed) {
                swept = swept
                    .checked_add(&bucket.remaining())
                    .ok_or_else(|| StakingError::Overflow("swept rewards".into()))?;
            }
        }
        self.reward_pool = self
            .reward_pool
            .checked_add(&swept)
            .ok_or_else(|| StakingError::Overflow("reward pool".into()))?;

        for closed in &expired {
            self.reward_buckets.remove(closed);
        }
        self.block_rewarded.retain(|(rewarded, _)| *rewarded >= epoch);

        if !expired.is_empty() {
            tracing::debug!(
                "Swept {} unclaimed from {} expired reward epochs",
                swept,
                expired.len()
            );
        }
        Ok(swept)
    }

    /// Pay the proposer's block reward, sweep expired buckets and close
    /// `epoch`'s bucket, as one step.
    ///
    /// Every sum is checked before the first write, so an overflow leaves
    /// the ledger and the balances untouched.
    pub fn settle_confirmed_block(
        &mut self,
        epoch: Epoch,
        proposer_id: StakerId,
        stake_getting_reward: Amount,
        now: &Moment,
        balances: &mut Balances,
        events: &mut EventLog,
    ) -> StakingResult<Amount> {
        let overflow = |what: &str| StakingError::Overflow(what.into());

        let staker = self.staker_ref(proposer_id)?;
        if !self.block_rewarded.contains(&(now.epoch, proposer_id)) {
            let reward = &self.config.block_reward;
            staker.stake.checked_add(reward).ok_or_else(|| overflow("stake"))?;
            self.total_locked
                .checked_add(reward)
                .ok_or_else(|| overflow("total locked stake"))?;
            balances
                .total_supply()
                .checked_add(reward)
                .ok_or_else(|| overflow("total supply"))?;
        }

        let mut pool = self.reward_pool.clone();
        let mut returning: Vec<Epoch> = self.expired_reward_epochs(epoch);
        returning.push(epoch);
        for closed in returning {
            if let Some(bucket) = self.reward_buckets.get(&closed) {
                pool = pool
                    .checked_add(&bucket.remaining())
                    .ok_or_else(|| overflow("reward pool"))?;
            }
        }

        let paid = self.give_block_reward(proposer_id, now, balances, events)?;
        self.sweep_reward_epochs(epoch)?;
        self.close_reward_epoch(epoch, stake_getting_reward)?;
        Ok(paid)
    }

    pub fn reward_bucket(&self, epoch: Epoch) -> Option<&RewardBucket> {
        self.reward_buckets.get(&epoch)
    }

    /// Share of `epoch`'s bucket earned by `weight`
    pub(crate) fn reward_share(&self, epoch: Epoch, weight: &Amount) -> Amount {
        self.reward_buckets
            .get(&epoch)
            .and_then(|bucket| {
                bucket
                    .pool
                    .mul_div(weight, &bucket.stake_getting_reward)
                    .map(|share| share.min(bucket.remaining()))
            })
            .unwrap_or_default()
    }

    /// Pay the staker's share of the bucket for its last scored reveal
    pub fn give_rewards(
        &mut self,
        staker_id: StakerId,
        now: &Moment,
        score: Option<&RevealScore>,
        events: &mut EventLog,
    ) -> StakingResult<Amount> {
        let plan = self.preview_settlement(staker_id, now, score)?;
        let Some(epoch) = plan.rewarded_epoch else {
            return Ok(Amount::zero());
        };

        self.staker_mut(staker_id)?.epoch_last_scored = Some(epoch);
        if plan.reward.is_zero() {
            return Ok(Amount::zero());
        }

        if let Some(bucket) = self.reward_buckets.get_mut(&epoch) {
            bucket.paid = bucket
                .paid
                .checked_add(&plan.reward)
                .ok_or_else(|| StakingError::Overflow("bucket payout".into()))?;
        }
        self.add_stake(staker_id, &plan.reward, StakeChangeReason::Reward, now, events)?;

        Ok(plan.reward)
    }

    /// Mint the block reward onto the proposer of `now.epoch`'s confirmed block, once
    pub fn give_block_reward(
        &mut self,
        staker_id: StakerId,
        now: &Moment,
        balances: &mut Balances,
        events: &mut EventLog,
    ) -> StakingResult<Amount> {
        self.staker_ref(staker_id)?;
        let reward = self.config.block_reward.clone();
        if reward.is_zero() || self.block_rewarded.contains(&(now.epoch, staker_id)) {
            return Ok(Amount::zero());
        }

        balances.record_issuance(&reward)?;
        self.block_rewarded.insert((now.epoch, staker_id));
        self.add_stake(staker_id, &reward, StakeChangeReason::BlockReward, now, events)?;

        Ok(reward)
    }

    /// Take back the block reward paid in `now.epoch` once the block behind
    /// it was invalidated. Returns the amount removed from the stake.
    pub fn revoke_block_reward(
        &mut self,
        staker_id: StakerId,
        now: &Moment,
        balances: &mut Balances,
        events: &mut EventLog,
    ) -> StakingResult<Amount> {
        if !self.block_rewarded.contains(&(now.epoch, staker_id)) {
            return Ok(Amount::zero());
        }

        let previous_stake = self.staker_ref(staker_id)?.stake.clone();
        // Stake may have shrunk since the reward was minted
        let amount = self.config.block_reward.clone().min(previous_stake.clone());
        let new_stake = previous_stake.saturating_sub(&amount);
        let total_locked = self
            .total_locked
            .checked_sub(&amount)
            .ok_or_else(|| StakingError::Overflow("total locked stake".into()))?;
        balances.revoke_issuance(&amount)?;

        self.total_locked = total_locked;
        self.block_rewarded.remove(&(now.epoch, staker_id));
        self.staker_mut(staker_id)?.stake = new_stake.clone();

        tracing::warn!(
            "Revoked block reward {} of staker {} in epoch {}",
            amount,
            staker_id,
            now.epoch
        );

        events.emit(
            now,
            OracleEvent::StakeChange {
                epoch: now.epoch,
                staker_id,
                previous_stake,
                new_stake,
                reason: StakeChangeReason::BlockRewardRevoked,
                timestamp: now.timestamp,
            },
        );
        Ok(amount)
    }

    fn add_stake(
        &mut self,
        staker_id: StakerId,
        amount: &Amount,
        reason: StakeChangeReason,
        now: &Moment,
        events: &mut EventLog,
    ) -> StakingResult<()> {
        let staker = self.staker_mut(staker_id)?;
        let previous_stake = staker.stake.clone();
        staker.stake = previous_stake
            .checked_add(amount)
            .ok_or_else(|| StakingError::Overflow("stake".into()))?;
        let new_stake = staker.stake.clone();

        self.total_locked = self
            .total_locked
            .checked_add(amount)
            .ok_or_else(|| StakingError::Overflow("total locked stake".into()))?;

        tracing::info!(
            "Staker {} earned {} ({:?}) in epoch {}",
            staker_id,
            amount,
            reason,
            now.epoch
        );

        events.emit(
            now,
            OracleEvent::StakeChange {
                epoch: now.epoch,
                staker_id,
                previous_stake,
                new_stake,
                reason,
                timestamp: now.timestamp,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{funded, moment, setup};
    use oracle_core::ProtocolConfig;

    fn score(epoch: Epoch, weight: u64) -> RevealScore {
        RevealScore {
            epoch,
            weight: Amount::from_u64(weight),
            out_of_bounds: 0,
            confirmed: true,
        }
    }

    #[test]
    fn test_bucket_split_by_weight() {
        let (mut ledger, mut events) = setup(ProtocolConfig::default());
        let (mut balances, addrs) = funded(&["alice", "bob"], 3_000);
        for (i, amount) in [1_000u64, 3_000].iter().enumerate() {
            ledger
                .stake(addrs[i], 1, &Amount::from_u64(*amount), &moment(1), &mut balances, &mut events)
                .unwrap();
            ledger.mark_revealed(i as u64 + 1, 1).unwrap();
        }

        ledger.fund_reward_pool(&Amount::from_u64(400)).unwrap();
        ledger.close_reward_epoch(1, Amount::from_u64(4_000)).unwrap();
        assert!(ledger.reward_pool().is_zero());

        let a = ledger.give_rewards(1, &moment(2), Some(&score(1, 1_000)), &mut events).unwrap();
        let b = ledger.give_rewards(2, &moment(2), Some(&score(1, 3_000)), &mut events).unwrap();
        assert_eq!(a, Amount::from_u64(100));
        assert_eq!(b, Amount::from_u64(300));
        assert!(ledger.reward_bucket(1).unwrap().remaining().is_zero());

        // Paid once
        let again = ledger.give_rewards(1, &moment(3), Some(&score(1, 1_000)), &mut events).unwrap();
        assert!(again.is_zero());
        assert_eq!(ledger.staker(1).unwrap().stake, Amount::from_u64(1_100));
    }

    #[test]
    fn test_reopen_returns_unpaid_rewards() {
        let (mut ledger, _) = setup(ProtocolConfig::default());
        ledger.fund_reward_pool(&Amount::from_u64(900)).unwrap();
        ledger.close_reward_epoch(4, Amount::from_u64(10)).unwrap();
        assert!(ledger.reward_pool().is_zero());

        ledger.reopen_reward_epoch(4).unwrap();
        assert_eq!(ledger.reward_pool(), &Amount::from_u64(900));
        assert!(ledger.reward_bucket(4).is_none());

        // No accurate revealers: the pool carries over
        ledger.close_reward_epoch(5, Amount::zero()).unwrap();
        assert_eq!(ledger.reward_pool(), &Amount::from_u64(900));
    }

    #[test]
    fn test_block_reward_once_per_epoch() {
        let (mut ledger, mut events) = setup(ProtocolConfig::default());
        let (mut balances, addrs) = funded(&["alice"], 1_000);
        ledger
            .stake(addrs[0], 1, &Amount::from_u64(1_000), &moment(1), &mut balances, &mut events)
            .unwrap();
        let supply = balances.total_supply().clone();

        let paid = ledger.give_block_reward(1, &moment(1), &mut balances, &mut events).unwrap();
        assert_eq!(paid, Amount::from_u64(100));
        let again = ledger.give_block_reward(1, &moment(1), &mut balances, &mut events).unwrap();
        assert!(again.is_zero());

        assert_eq!(ledger.staker(1).unwrap().stake, Amount::from_u64(1_100));
        assert_eq!(balances.total_supply(), &supply.checked_add(&Amount::from_u64(100)).unwrap());
    }

    #[test]
    fn test_expired_buckets_return_to_pool() {
        let config = ProtocolConfig {
            reward_claim_epochs: 3,
            ..ProtocolConfig::default()
        };
        let (mut ledger, mut events) = setup(config);
        let (mut balances, addrs) = funded(&["alice"], 1_000);
        ledger
            .stake(addrs[0], 1, &Amount::from_u64(1_000), &moment(1), &mut balances, &mut events)
            .unwrap();

        ledger.fund_reward_pool(&Amount::from_u64(600)).unwrap();
        ledger
            .settle_confirmed_block(1, 1, Amount::from_u64(1_000), &moment(1), &mut balances, &mut events)
            .unwrap();
        assert!(ledger.reward_bucket(1).is_some());

        // Still claimable at the edge of the window
        assert!(ledger.sweep_reward_epochs(4).unwrap().is_zero());
        assert!(ledger.reward_bucket(1).is_some());

        let swept = ledger.sweep_reward_epochs(5).unwrap();
        assert_eq!(swept, Amount::from_u64(600));
        assert_eq!(ledger.reward_pool(), &Amount::from_u64(600));
        assert!(ledger.reward_bucket(1).is_none());
        assert!(ledger.block_rewarded.is_empty());
    }

    #[test]
    fn test_revoke_block_reward() {
        let (mut ledger, mut events) = setup(ProtocolConfig::default());
        let (mut balances, addrs) = funded(&["alice"], 1_000);
        ledger
            .stake(addrs[0], 1, &Amount::from_u64(1_000), &moment(1), &mut balances, &mut events)
            .unwrap();
        let supply = balances.total_supply().clone();

        ledger.give_block_reward(1, &moment(1), &mut balances, &mut events).unwrap();
        let revoked = ledger.revoke_block_reward(1, &moment(1), &mut balances, &mut events).unwrap();
        assert_eq!(revoked, Amount::from_u64(100));
        assert_eq!(ledger.staker(1).unwrap().stake, Amount::from_u64(1_000));
        assert_eq!(ledger.total_locked(), &Amount::from_u64(1_000));
        assert_eq!(balances.total_supply(), &supply);

        // Nothing left to take back, and a fresh block may be rewarded again
        let again = ledger.revoke_block_reward(1, &moment(1), &mut balances, &mut events).unwrap();
        assert!(again.is_zero());
        let paid = ledger.give_block_reward(1, &moment(1), &mut balances, &mut events).unwrap();
        assert_eq!(paid, Amount::from_u64(100));
    }

    #[test]
    fn test_settle_overflow_leaves_ledger_untouched() {
        let (mut ledger, mut events) = setup(ProtocolConfig::default());
        let (mut balances, addrs) = funded(&["alice"], 1_000);
        ledger
            .stake(addrs[0], 1, &Amount::from_u64(1_000), &moment(1), &mut balances, &mut events)
            .unwrap();

        let max = Amount::from_be_bytes(&[0xff; 32]);
        ledger.fund_reward_pool(&max).unwrap();
        ledger.close_reward_epoch(1, Amount::from_u64(1_000)).unwrap();
        ledger.fund_reward_pool(&max).unwrap();

        let supply = balances.total_supply().clone();
        let events_before = events.len();
        let result =
            ledger.settle_confirmed_block(1, 1, Amount::from_u64(1_000), &moment(1), &mut balances, &mut events);
        assert!(matches!(result, Err(StakingError::Overflow(_))));

        assert_eq!(ledger.staker(1).unwrap().stake, Amount::from_u64(1_000));
        assert_eq!(balances.total_supply(), &supply);
        assert_eq!(ledger.reward_pool(), &max);
        assert_eq!(ledger.reward_bucket(1).unwrap().pool, max);
        assert_eq!(events.len(), events_before);
    }
}
