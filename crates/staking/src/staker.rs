// staking/src/staker.rs

use oracle_core::{Amount, Epoch, StakerId};
use oracle_crypto::Address;
use serde::{Deserialize, Serialize};

/// A collateral-locking participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staker {
    /// Assigned once at first stake, never reused
    pub id: StakerId,
    pub address: Address,
    /// Locked stake; zeroed by withdraw or slashing, never removed
    pub stake: Amount,
    pub epoch_staked: Epoch,
    pub epoch_last_committed: Option<Epoch>,
    pub epoch_last_revealed: Option<Epoch>,
    /// First epoch a pending unstake request may be withdrawn
    pub unstake_after: Option<Epoch>,
    /// Last epoch a pending unstake request may be withdrawn
    pub withdraw_after: Option<Epoch>,
    /// Last epoch whose inactivity penalty was applied
    pub epoch_last_penalized: Option<Epoch>,
    /// Last reveal epoch whose accuracy was rewarded or penalized
    pub epoch_last_scored: Option<Epoch>,
}

impl Staker {
    pub fn new(id: StakerId, address: Address, stake: Amount, epoch: Epoch) -> Self {
        Self {
            id,
            address,
            stake,
            epoch_staked: epoch,
            epoch_last_committed: None,
            epoch_last_revealed: None,
            unstake_after: None,
            withdraw_after: None,
            epoch_last_penalized: None,
            epoch_last_scored: None,
        }
    }

    /// An unstake request is outstanding and its withdraw window has not lapsed
    pub fn unstake_pending(&self, epoch: Epoch) -> bool {
        match self.withdraw_after {
            Some(withdraw_after) => self.unstake_after.is_some() && epoch <= withdraw_after,
            None => false,
        }
    }

    /// Last epoch the staker was known to participate
    pub fn last_active_epoch(&self) -> Epoch {
        self.epoch_last_revealed
            .map_or(self.epoch_staked, |revealed| revealed.max(self.epoch_staked))
    }

    /// Whole epochs missed between the last activity and `epoch`
    pub fn epochs_inactive(&self, epoch: Epoch) -> u64 {
        epoch.saturating_sub(self.last_active_epoch()).saturating_sub(1)
    }

    /// Start over after the stake was withdrawn or slashed away: activity
    /// counts from `epoch`, and the last reveal is never scored again.
    pub fn restart(&mut self, stake: Amount, epoch: Epoch) {
        self.stake = stake;
        self.epoch_staked = epoch;
        self.epoch_last_scored = self.epoch_last_revealed;
        self.clear_unstake();
    }

    pub fn clear_unstake(&mut self) {
        self.unstake_after = None;
        self.withdraw_after = None;
    }
}
