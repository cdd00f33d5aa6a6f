// staking/src/slashing.rs

use crate::{StakeLedger, StakingError, StakingResult};
use oracle_core::{
    Amount, Balances, Epoch, EventLog, Moment, OracleEvent, StakeChangeReason, StakerId,
    Timestamp,
};
use oracle_crypto::Address;
use serde::{Deserialize, Serialize};

/// Misbehaviour that forfeits stake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlashReason {
    /// Proposed a block whose medians did not match the revealed votes
    InvalidBlock,
    /// Leaked the commit secret before the reveal phase
    LeakedSecret,
}

/// A slash as recorded in the ledger history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashRecord {
    pub staker_id: StakerId,
    pub reason: SlashReason,
    pub epoch: Epoch,
    /// Stake removed
    pub amount: Amount,
    pub bounty_hunter: Address,
    pub distribution: SlashDistribution,
    pub timestamp: Timestamp,
}

/// Where slashed stake goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashDistribution {
    /// Paid to the bounty hunter's balance
    pub bounty: Amount,
    /// Removed from supply
    pub burn: Amount,
}

impl SlashDistribution {
    pub fn from_slashed_amount(amount: &Amount, bounty_bps: u16) -> Self {
        let bounty = amount.apply_bps(bounty_bps);
        let burn = amount.saturating_sub(&bounty);
        Self { bounty, burn }
    }
}

impl StakeLedger {
    /// Stake a slash would remove right now
    pub fn calculate_slash_amount(&self, staker_id: StakerId) -> StakingResult<Amount> {
        Ok(self.staker_ref(staker_id)?.stake.apply_bps(self.config.slash_bps))
    }

    /// Remove the configured share of a staker's stake, paying the bounty
    /// hunter and burning the remainder
    pub fn slash(
        &mut self,
        staker_id: StakerId,
        bounty_hunter: Address,
        reason: SlashReason,
        now: &Moment,
        balances: &mut Balances,
        events: &mut EventLog,
    ) -> StakingResult<SlashRecord> {
        let amount = self.calculate_slash_amount(staker_id)?;
        let distribution = SlashDistribution::from_slashed_amount(&amount, self.config.bounty_bps);
        let total_slashed = self
            .total_slashed
            .checked_add(&amount)
            .ok_or_else(|| StakingError::Overflow("total slashed".into()))?;

        balances.burn(&distribution.burn)?;
        balances.credit(bounty_hunter, &distribution.bounty)?;

        let staker = self.staker_mut(staker_id)?;
        let previous_stake = staker.stake.clone();
        staker.stake = previous_stake.saturating_sub(&amount);
        let new_stake = staker.stake.clone();

        self.total_locked = self.total_locked.saturating_sub(&amount);
        self.total_slashed = total_slashed;

        let record = SlashRecord {
            staker_id,
            reason,
            epoch: now.epoch,
            amount,
            bounty_hunter,
            distribution,
            timestamp: now.timestamp,
        };
        self.slashing_history.push(record.clone());

        tracing::warn!(
            "Staker {} slashed {} for {:?}, bounty {} to {}",
            staker_id,
            record.amount,
            reason,
            record.distribution.bounty,
            bounty_hunter
        );

        events.emit(
            now,
            OracleEvent::StakeChange {
                epoch: now.epoch,
                staker_id,
                previous_stake,
                new_stake,
                reason: StakeChangeReason::Slash,
                timestamp: now.timestamp,
            },
        );

        Ok(record)
    }

    pub fn slashing_history(&self) -> &[SlashRecord] {
        &self.slashing_history
    }

    pub fn slashes_of(&self, staker_id: StakerId) -> impl Iterator<Item = &SlashRecord> {
        self.slashing_history
            .iter()
            .filter(move |record| record.staker_id == staker_id)
    }

    pub fn total_slashed(&self) -> &Amount {
        &self.total_slashed
    }
}
