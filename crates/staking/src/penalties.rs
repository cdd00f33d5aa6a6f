// staking/src/penalties.rs

use crate::{StakeLedger, StakingResult};
use oracle_core::{
    Amount, Epoch, EventLog, Moment, OracleEvent, StakeChangeReason, StakerId, BPS_DENOMINATOR,
};
use serde::{Deserialize, Serialize};

/// How a staker's last reveal fared against the block confirmed for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealScore {
    /// Epoch of the reveal
    pub epoch: Epoch,
    /// Stake the votes were revealed with
    pub weight: Amount,
    /// Revealed values outside the confirmed block's cutoffs
    pub out_of_bounds: u64,
    /// A block was confirmed for `epoch`
    pub confirmed: bool,
}

/// Stake movements a commit would trigger, computed without mutating
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub inactivity_penalty: Amount,
    pub vote_penalty: Amount,
    pub reward: Amount,
    pub stake_after: Amount,
    pub(crate) check_inactivity: bool,
    pub(crate) penalized_epoch: Option<Epoch>,
    pub(crate) rewarded_epoch: Option<Epoch>,
}

/// Stake left after `epochs_inactive` missed epochs.
///
/// Each epoch beyond the grace keeps `retention_bps` of the stake, so the
/// result never exceeds `stake` and never increases with inactivity.
pub fn inactivity_decay(
    epochs_inactive: u64,
    stake: &Amount,
    grace_epochs: u64,
    retention_bps: u16,
) -> Amount {
    let decaying = epochs_inactive.saturating_sub(grace_epochs);
    if decaying == 0 || u64::from(retention_bps) >= BPS_DENOMINATOR {
        return stake.clone();
    }

    let mut remaining = stake.clone();
    for _ in 0..decaying {
        if remaining.is_zero() {
            break;
        }
        remaining = remaining.apply_bps(retention_bps);
    }
    remaining
}

impl StakeLedger {
    /// Stake remaining after the configured inactivity decay
    pub fn calculate_inactivity_penalties(&self, epochs_inactive: u64, stake: &Amount) -> Amount {
        inactivity_decay(
            epochs_inactive,
            stake,
            self.config.inactivity_grace_epochs,
            self.config.inactivity_retention_bps,
        )
    }

    /// Everything `give_penalties` then `give_rewards` would do at `now`
    pub fn preview_settlement(
        &self,
        staker_id: StakerId,
        now: &Moment,
        score: Option<&RevealScore>,
    ) -> StakingResult<Settlement> {
        let staker = self.staker_ref(staker_id)?;
        let mut stake = staker.stake.clone();

        let check_inactivity = staker
            .epoch_last_penalized
            .map_or(true, |epoch| epoch < now.epoch);
        let inactivity_penalty = if check_inactivity {
            let remaining =
                self.calculate_inactivity_penalties(staker.epochs_inactive(now.epoch), &stake);
            let penalty = stake.saturating_sub(&remaining);
            stake = remaining;
            penalty
        } else {
            Amount::zero()
        };

        let scorable = score.filter(|s| {
            s.confirmed
                && s.epoch < now.epoch
                && staker.epoch_last_scored.map_or(true, |scored| scored < s.epoch)
        });

        let mut vote_penalty = Amount::zero();
        let mut reward = Amount::zero();
        let mut penalized_epoch = None;
        let mut rewarded_epoch = None;

        match scorable {
            Some(s) if s.out_of_bounds > 0 => {
                let bps = (u64::from(self.config.vote_penalty_bps) * s.out_of_bounds)
                    .min(BPS_DENOMINATOR) as u16;
                vote_penalty = stake.apply_bps(bps);
                stake = stake.saturating_sub(&vote_penalty);
                penalized_epoch = Some(s.epoch);
            }
            Some(s) => {
                reward = self.reward_share(s.epoch, &s.weight);
                stake = stake
                    .checked_add(&reward)
                    .ok_or_else(|| crate::StakingError::Overflow("reward".into()))?;
                rewarded_epoch = Some(s.epoch);
            }
            None => {}
        }

        Ok(Settlement {
            inactivity_penalty,
            vote_penalty,
            reward,
            stake_after: stake,
            check_inactivity,
            penalized_epoch,
            rewarded_epoch,
        })
    }

    /// Apply the inactivity and vote-accuracy penalties due at `now`.
    ///
    /// Each kind is applied at most once: inactivity per current epoch,
    /// accuracy per reveal epoch. Penalties feed the reward pool.
    pub fn give_penalties(
        &mut self,
        staker_id: StakerId,
        now: &Moment,
        score: Option<&RevealScore>,
        events: &mut EventLog,
    ) -> StakingResult<Amount> {
        let plan = self.preview_settlement(staker_id, now, score)?;

        if plan.check_inactivity {
            self.staker_mut(staker_id)?.epoch_last_penalized = Some(now.epoch);
            self.take_penalty(
                staker_id,
                &plan.inactivity_penalty,
                StakeChangeReason::InactivityPenalty,
                now,
                events,
            )?;
        }

        if let Some(epoch) = plan.penalized_epoch {
            self.staker_mut(staker_id)?.epoch_last_scored = Some(epoch);
            self.take_penalty(
                staker_id,
                &plan.vote_penalty,
                StakeChangeReason::VotePenalty,
                now,
                events,
            )?;
        }

        plan.inactivity_penalty
            .checked_add(&plan.vote_penalty)
            .ok_or_else(|| crate::StakingError::Overflow("penalty".into()))
    }

    fn take_penalty(
        &mut self,
        staker_id: StakerId,
        penalty: &Amount,
        reason: StakeChangeReason,
        now: &Moment,
        events: &mut EventLog,
    ) -> StakingResult<()> {
        if penalty.is_zero() {
            return Ok(());
        }

        let staker = self.staker_mut(staker_id)?;
        let previous_stake = staker.stake.clone();
        staker.stake = previous_stake.saturating_sub(penalty);
        let new_stake = staker.stake.clone();

        self.total_locked = self.total_locked.saturating_sub(penalty);
        self.reward_pool = self
            .reward_pool
            .checked_add(penalty)
            .ok_or_else(|| crate::StakingError::Overflow("reward pool".into()))?;

        tracing::info!(
            "Staker {} penalized {} ({:?}) in epoch {}",
            staker_id,
            penalty,
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
