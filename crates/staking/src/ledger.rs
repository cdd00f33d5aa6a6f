// staking/src/ledger.rs

use crate::{RewardBucket, SlashRecord, Staker, StakingError, StakingResult};
use oracle_core::{
    Amount, Balances, Epoch, EventLog, Moment, OracleEvent, ProtocolConfig, StakeReader,
    StakerId,
};
use oracle_crypto::Address;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Registry of stakers and the locked collateral they carry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeLedger {
    pub(crate) config: ProtocolConfig,
    pub(crate) stakers: BTreeMap<StakerId, Staker>,
    pub(crate) ids: BTreeMap<Address, StakerId>,
    pub(crate) num_stakers: u64,
    /// Sum of every staker's stake
    pub(crate) total_locked: Amount,
    /// Penalties and job credits waiting for the next confirmed epoch
    pub(crate) reward_pool: Amount,
    pub(crate) reward_buckets: BTreeMap<Epoch, RewardBucket>,
    pub(crate) block_rewarded: BTreeSet<(Epoch, StakerId)>,
    pub(crate) slashing_history: Vec<SlashRecord>,
    pub(crate) total_slashed: Amount,
}

impl StakeLedger {
    pub fn new(config: ProtocolConfig) -> Self {
        Self {
            config,
            stakers: BTreeMap::new(),
            ids: BTreeMap::new(),
            num_stakers: 0,
            total_locked: Amount::zero(),
            reward_pool: Amount::zero(),
            reward_buckets: BTreeMap::new(),
            block_rewarded: BTreeSet::new(),
            slashing_history: Vec::new(),
            total_slashed: Amount::zero(),
        }
    }

    /// Lock `amount` from the caller's balance.
    ///
    /// The first stake registers a new staker id; later stakes top up the
    /// existing entry. Returns the staker id.
    pub fn stake(
        &mut self,
        address: Address,
        epoch: Epoch,
        amount: &Amount,
        now: &Moment,
        balances: &mut Balances,
        events: &mut EventLog,
    ) -> StakingResult<StakerId> {
        now.require_epoch(epoch)?;
        if amount.is_zero() {
            return Err(StakingError::ZeroAmount);
        }

        let existing = self.ids.get(&address).and_then(|id| self.stakers.get(id));
        let previous_stake = existing.map(|s| s.stake.clone()).unwrap_or_default();

        if let Some(staker) = existing {
            if staker.unstake_pending(now.epoch) {
                return Err(StakingError::UnstakeInProgress {
                    staker_id: staker.id,
                    withdraw_after: staker.withdraw_after.unwrap_or(now.epoch),
                });
            }
        }

        let new_stake = previous_stake
            .checked_add(amount)
            .ok_or_else(|| StakingError::Overflow("stake exceeds 256 bits".into()))?;
        if new_stake < self.config.min_stake {
            return Err(StakingError::BelowMinimum {
                required: self.config.min_stake.clone(),
                provided: new_stake,
            });
        }
        let total_locked = self
            .total_locked
            .checked_add(amount)
            .ok_or_else(|| StakingError::Overflow("total locked stake".into()))?;

        balances.debit(address, amount)?;

        let staker_id = match self.ids.get(&address).copied() {
            Some(id) => {
                let staker = self.stakers.get_mut(&id).ok_or_else(|| {
                    StakingError::StakerNotFound(format!("id {} indexed but missing", id))
                })?;
                if previous_stake.is_zero() {
                    staker.restart(new_stake.clone(), epoch);
                } else {
                    staker.stake = new_stake.clone();
                    staker.clear_unstake();
                }
                id
            }
            None => {
                self.num_stakers += 1;
                let id = self.num_stakers;
                self.stakers
                    .insert(id, Staker::new(id, address, new_stake.clone(), epoch));
                self.ids.insert(address, id);
                id
            }
        };
        self.total_locked = total_locked;

        tracing::info!(
            "Staker {} ({}) staked {} in epoch {}, stake now {}",
            staker_id,
            address,
            amount,
            epoch,
            new_stake
        );

        events.emit(
            now,
            OracleEvent::Staked {
                epoch,
                staker_id,
                address,
                previous_stake,
                new_stake,
                timestamp: now.timestamp,
            },
        );

        Ok(staker_id)
    }

    /// Request the stake back; funds stay locked through the cool-down
    pub fn unstake(
        &mut self,
        address: Address,
        epoch: Epoch,
        now: &Moment,
        events: &mut EventLog,
    ) -> StakingResult<()> {
        now.require_epoch(epoch)?;

        let unstake_after = epoch + self.config.unstake_cooldown;
        let withdraw_after = unstake_after + self.config.withdraw_release_period;

        let staker = self.staker_by_address_mut(&address)?;
        if staker.stake.is_zero() {
            return Err(StakingError::InsufficientStake {
                required: Amount::from_u64(1),
                provided: Amount::zero(),
            });
        }
        if staker.unstake_pending(epoch) {
            return Err(StakingError::AlreadyUnstaking {
                staker_id: staker.id,
            });
        }

        staker.unstake_after = Some(unstake_after);
        staker.withdraw_after = Some(withdraw_after);
        let (staker_id, stake) = (staker.id, staker.stake.clone());

        tracing::info!(
            "Staker {} requested unstake in epoch {}, withdrawable {}..={}",
            staker_id,
            epoch,
            unstake_after,
            withdraw_after
        );

        events.emit(
            now,
            OracleEvent::Unstaked {
                epoch,
                staker_id,
                stake,
                unstake_after,
                withdraw_after,
                timestamp: now.timestamp,
            },
        );

        Ok(())
    }

    /// Release the whole stake once the cool-down has passed and the
    /// release window is still open. Returns the amount released.
    pub fn withdraw(
        &mut self,
        address: Address,
        epoch: Epoch,
        now: &Moment,
        balances: &mut Balances,
        events: &mut EventLog,
    ) -> StakingResult<Amount> {
        now.require_epoch(epoch)?;

        let staker = self.staker_by_address(&address)?;
        let (unstake_after, withdraw_after) = match (staker.unstake_after, staker.withdraw_after) {
            (Some(unstake_after), Some(withdraw_after)) => (unstake_after, withdraw_after),
            _ => {
                return Err(StakingError::NoUnstakeRequest {
                    staker_id: staker.id,
                })
            }
        };
        if epoch < unstake_after {
            return Err(StakingError::TooEarly {
                staker_id: staker.id,
                epoch,
                unstake_after,
            });
        }
        if epoch > withdraw_after {
            return Err(StakingError::WithdrawWindowLapsed {
                staker_id: staker.id,
                withdraw_after,
            });
        }

        let staker_id = staker.id;
        let amount = staker.stake.clone();
        balances.credit(address, &amount)?;

        let staker = self.staker_mut(staker_id)?;
        staker.stake = Amount::zero();
        staker.clear_unstake();
        self.total_locked = self.total_locked.saturating_sub(&amount);

        tracing::info!(
            "Staker {} withdrew {} in epoch {}",
            staker_id,
            amount,
            epoch
        );

        events.emit(
            now,
            OracleEvent::Withdrew {
                epoch,
                staker_id,
                amount: amount.clone(),
                new_stake: Amount::zero(),
                timestamp: now.timestamp,
            },
        );

        Ok(amount)
    }

    /// Record a successful commit
    pub fn mark_committed(&mut self, staker_id: StakerId, epoch: Epoch) -> StakingResult<()> {
        self.staker_mut(staker_id)?.epoch_last_committed = Some(epoch);
        Ok(())
    }

    /// Record a successful reveal
    pub fn mark_revealed(&mut self, staker_id: StakerId, epoch: Epoch) -> StakingResult<()> {
        self.staker_mut(staker_id)?.epoch_last_revealed = Some(epoch);
        Ok(())
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn staker(&self, staker_id: StakerId) -> Option<&Staker> {
        self.stakers.get(&staker_id)
    }

    pub fn staker_id(&self, address: &Address) -> Option<StakerId> {
        self.ids.get(address).copied()
    }

    pub fn stakers(&self) -> impl Iterator<Item = &Staker> {
        self.stakers.values()
    }

    pub fn total_locked(&self) -> &Amount {
        &self.total_locked
    }

    pub fn reward_pool(&self) -> &Amount {
        &self.reward_pool
    }

    /// Staker with the largest stake; ties go to the lowest id
    pub fn biggest_staker(&self) -> Option<(StakerId, Amount)> {
        let mut biggest: Option<&Staker> = None;
        for staker in self.stakers.values() {
            match biggest {
                Some(current) if staker.stake <= current.stake => {}
                _ => biggest = Some(staker),
            }
        }
        biggest.map(|s| (s.id, s.stake.clone()))
    }

    pub(crate) fn staker_by_address(&self, address: &Address) -> StakingResult<&Staker> {
        self.ids
            .get(address)
            .and_then(|id| self.stakers.get(id))
            .ok_or_else(|| StakingError::StakerNotFound(address.to_string()))
    }

    fn staker_by_address_mut(&mut self, address: &Address) -> StakingResult<&mut Staker> {
        let id = self
            .ids
            .get(address)
            .copied()
            .ok_or_else(|| StakingError::StakerNotFound(address.to_string()))?;
        self.staker_mut(id)
    }

    pub(crate) fn staker_ref(&self, staker_id: StakerId) -> StakingResult<&Staker> {
        self.stakers
            .get(&staker_id)
            .ok_or_else(|| StakingError::StakerNotFound(format!("id {}", staker_id)))
    }

    pub(crate) fn staker_mut(&mut self, staker_id: StakerId) -> StakingResult<&mut Staker> {
        self.stakers
            .get_mut(&staker_id)
            .ok_or_else(|| StakingError::StakerNotFound(format!("id {}", staker_id)))
    }
}

impl StakeReader for StakeLedger {
    fn stake_of(&self, staker_id: StakerId) -> Option<Amount> {
        self.stakers.get(&staker_id).map(|s| s.stake.clone())
    }

    fn staker_id_of(&self, address: &Address) -> Option<StakerId> {
        self.staker_id(address)
    }

    fn num_stakers(&self) -> u64 {
        self.num_stakers
    }

    fn biggest_stake(&self) -> Option<Amount> {
        self.biggest_staker().map(|(_, stake)| stake)
    }

    fn epoch_last_revealed(&self, staker_id: StakerId) -> Option<Epoch> {
        self.stakers
            .get(&staker_id)
            .and_then(|s| s.epoch_last_revealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{funded, moment, setup};
    use oracle_core::ErrorKind;

    fn config() -> ProtocolConfig {
        ProtocolConfig {
            min_stake: Amount::from_u64(100),
            unstake_cooldown: 2,
            withdraw_release_period: 3,
            ..ProtocolConfig::default()
        }
    }

    #[test]
    fn test_stake_registers_sequential_ids() {
        let (mut ledger, mut events) = setup(config());
        let (mut balances, addrs) = funded(&["alice", "bob"], 5_000);
        let now = moment(1);

        let a = ledger
            .stake(addrs[0], 1, &Amount::from_u64(1_000), &now, &mut balances, &mut events)
            .unwrap();
        let b = ledger
            .stake(addrs[1], 1, &Amount::from_u64(500), &now, &mut balances, &mut events)
            .unwrap();

        assert_eq!((a, b), (1, 2));
        assert_eq!(ledger.num_stakers(), 2);
        assert_eq!(ledger.total_locked(), &Amount::from_u64(1_500));
        assert_eq!(balances.balance_of(&addrs[0]), Amount::from_u64(4_000));
        assert_eq!(ledger.biggest_staker(), Some((1, Amount::from_u64(1_000))));

        // Top-up keeps the id
        let again = ledger
            .stake(addrs[1], 1, &Amount::from_u64(500), &now, &mut balances, &mut events)
            .unwrap();
        assert_eq!(again, 2);
        assert_eq!(ledger.stake_of(2), Some(Amount::from_u64(1_000)));
        assert_eq!(events.named("Staked").count(), 3);
    }

    #[test]
    fn test_stake_rejections() {
        let (mut ledger, mut events) = setup(config());
        let (mut balances, addrs) = funded(&["alice"], 150);
        let now = moment(1);

        let err = ledger
            .stake(addrs[0], 1, &Amount::zero(), &now, &mut balances, &mut events)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = ledger
            .stake(addrs[0], 1, &Amount::from_u64(50), &now, &mut balances, &mut events)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Economic);

        let err = ledger
            .stake(addrs[0], 2, &Amount::from_u64(100), &now, &mut balances, &mut events)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Phase);

        let err = ledger
            .stake(addrs[0], 1, &Amount::from_u64(200), &now, &mut balances, &mut events)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Economic);

        // Nothing moved
        assert_eq!(ledger.num_stakers(), 0);
        assert_eq!(balances.balance_of(&addrs[0]), Amount::from_u64(150));
        assert!(events.is_empty());
    }

    #[test]
    fn test_unstake_then_withdraw_window() {
        let (mut ledger, mut events) = setup(config());
        let (mut balances, addrs) = funded(&["alice"], 1_000);
        let alice = addrs[0];

        ledger
            .stake(alice, 10, &Amount::from_u64(1_000), &moment(10), &mut balances, &mut events)
            .unwrap();
        ledger.unstake(alice, 10, &moment(10), &mut events).unwrap();

        let err = ledger.unstake(alice, 11, &moment(11), &mut events).unwrap_err();
        assert!(matches!(err, StakingError::AlreadyUnstaking { staker_id: 1 }));

        let err = ledger
            .stake(alice, 11, &Amount::from_u64(1), &moment(11), &mut balances, &mut events)
            .unwrap_err();
        assert!(matches!(err, StakingError::UnstakeInProgress { .. }));

        let err = ledger
            .withdraw(alice, 11, &moment(11), &mut balances, &mut events)
            .unwrap_err();
        assert!(matches!(err, StakingError::TooEarly { unstake_after: 12, .. }));
        assert_eq!(err.kind(), ErrorKind::Economic);

        let released = ledger
            .withdraw(alice, 12, &moment(12), &mut balances, &mut events)
            .unwrap();
        assert_eq!(released, Amount::from_u64(1_000));
        assert_eq!(ledger.stake_of(1), Some(Amount::zero()));
        assert!(ledger.total_locked().is_zero());
        assert_eq!(balances.balance_of(&alice), Amount::from_u64(1_000));

        // The staker entry survives a full withdraw
        assert_eq!(ledger.staker_id(&alice), Some(1));
    }

    #[test]
    fn test_restake_after_withdraw_starts_fresh() {
        let (mut ledger, mut events) = setup(config());
        let (mut balances, addrs) = funded(&["alice"], 1_000);
        let alice = addrs[0];

        ledger
            .stake(alice, 10, &Amount::from_u64(1_000), &moment(10), &mut balances, &mut events)
            .unwrap();
        ledger.mark_revealed(1, 10).unwrap();
        ledger.unstake(alice, 11, &moment(11), &mut events).unwrap();
        ledger
            .withdraw(alice, 13, &moment(13), &mut balances, &mut events)
            .unwrap();

        ledger
            .stake(alice, 30, &Amount::from_u64(1_000), &moment(30), &mut balances, &mut events)
            .unwrap();
        let staker = ledger.staker(1).unwrap();
        assert_eq!(staker.epoch_staked, 30);
        assert_eq!(staker.epoch_last_scored, Some(10));
        assert_eq!(staker.epochs_inactive(31), 0);

        // The idle gap before the new stake is not decayed
        let settlement = ledger.preview_settlement(1, &moment(31), None).unwrap();
        assert!(settlement.inactivity_penalty.is_zero());
        assert_eq!(settlement.stake_after, Amount::from_u64(1_000));
    }

    #[test]
    fn test_withdraw_window_lapses() {
        let (mut ledger, mut events) = setup(config());
        let (mut balances, addrs) = funded(&["alice"], 1_000);
        let alice = addrs[0];

        ledger
            .stake(alice, 1, &Amount::from_u64(500), &moment(1), &mut balances, &mut events)
            .unwrap();
        ledger.unstake(alice, 1, &moment(1), &mut events).unwrap();

        let err = ledger
            .withdraw(alice, 7, &moment(7), &mut balances, &mut events)
            .unwrap_err();
        assert!(matches!(err, StakingError::WithdrawWindowLapsed { withdraw_after: 6, .. }));

        // A lapsed request can be renewed
        ledger.unstake(alice, 7, &moment(7), &mut events).unwrap();
        assert_eq!(ledger.staker(1).unwrap().unstake_after, Some(9));
    }

    #[test]
    fn test_withdraw_without_request() {
        let (mut ledger, mut events) = setup(config());
        let (mut balances, addrs) = funded(&["alice"], 1_000);
        ledger
            .stake(addrs[0], 1, &Amount::from_u64(500), &moment(1), &mut balances, &mut events)
            .unwrap();

        let err = ledger
            .withdraw(addrs[0], 5, &moment(5), &mut balances, &mut events)
            .unwrap_err();
        assert!(matches!(err, StakingError::NoUnstakeRequest { staker_id: 1 }));

        let stranger = Address::derive(b"stranger");
        let err = ledger.unstake(stranger, 1, &moment(1), &mut events).unwrap_err();
        assert!(matches!(err, StakingError::StakerNotFound(_)));
    }
}
