// oracle-core/src/config.rs

use crate::{clock::Phase, Amount, BlockNumber, CoreError, CoreResult, BPS_DENOMINATOR};
use oracle_crypto::Hash;
use serde::{Deserialize, Serialize};

/// Every protocol constant, fixed at genesis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Ledger height at which epoch 0 starts
    pub genesis_height: BlockNumber,
    /// Heights per epoch; must split evenly into the five phases
    pub epoch_length: u64,
    /// Seed for the first epochs, before any block is confirmed
    pub genesis_seed: Hash,
    /// Minimum stake to join, commit and propose
    pub min_stake: Amount,
    /// Epochs between an unstake request and the first allowed withdraw
    pub unstake_cooldown: u64,
    /// Epochs after the cool-down during which the withdraw stays open
    pub withdraw_release_period: u64,
    /// Missed epochs tolerated before inactivity decay starts
    pub inactivity_grace_epochs: u64,
    /// Share of stake kept per missed epoch beyond the grace (basis points)
    pub inactivity_retention_bps: u16,
    /// Stake share lost per revealed value outside the confirmed cutoffs
    pub vote_penalty_bps: u16,
    /// Share of stake removed by a slash
    pub slash_bps: u16,
    /// Share of the slashed amount paid to the bounty hunter; the rest burns
    pub bounty_bps: u16,
    /// Minted onto the confirmed proposer's stake
    pub block_reward: Amount,
    /// Epochs a closed reward bucket stays claimable before it returns to the pool
    pub reward_claim_epochs: u64,
    /// Cumulative-weight percentile of the lower outlier cutoff
    pub lower_cutoff_bps: u16,
    /// Cumulative-weight percentile of the higher outlier cutoff
    pub higher_cutoff_bps: u16,
    /// Smallest credit accepted when creating a job or collection
    pub min_job_credit: Amount,
    /// Iterations a client scans when looking for its election
    pub max_election_iterations: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            genesis_height: 0,
            epoch_length: 300,
            genesis_seed: Hash::zero(),
            min_stake: Amount::from_u64(1),
            unstake_cooldown: 2,
            withdraw_release_period: 5,
            inactivity_grace_epochs: 1,
            inactivity_retention_bps: 5_000,
            vote_penalty_bps: 100,
            slash_bps: 10_000,
            bounty_bps: 5_000,
            block_reward: Amount::from_u64(100),
            reward_claim_epochs: 10,
            lower_cutoff_bps: 2_500,
            higher_cutoff_bps: 7_500,
            min_job_credit: Amount::from_u64(1),
            max_election_iterations: 10_000,
        }
    }
}

impl ProtocolConfig {
    pub const MEDIAN_BPS: u16 = 5_000;

    pub fn validate(&self) -> CoreResult<()> {
        if self.epoch_length == 0 || self.epoch_length % Phase::COUNT != 0 {
            return Err(CoreError::InvalidConfiguration(format!(
                "epoch_length {} must be a positive multiple of {}",
                self.epoch_length,
                Phase::COUNT
            )));
        }

        let bps_fields = [
            ("inactivity_retention_bps", self.inactivity_retention_bps),
            ("vote_penalty_bps", self.vote_penalty_bps),
            ("slash_bps", self.slash_bps),
            ("bounty_bps", self.bounty_bps),
            ("lower_cutoff_bps", self.lower_cutoff_bps),
            ("higher_cutoff_bps", self.higher_cutoff_bps),
        ];
        for (name, value) in bps_fields {
            if u64::from(value) > BPS_DENOMINATOR {
                return Err(CoreError::InvalidConfiguration(format!(
                    "{name} = {value} exceeds {BPS_DENOMINATOR}"
                )));
            }
        }

        if self.lower_cutoff_bps > Self::MEDIAN_BPS || self.higher_cutoff_bps < Self::MEDIAN_BPS {
            return Err(CoreError::InvalidConfiguration(
                "cutoff percentiles must bracket the median".into(),
            ));
        }

        if self.unstake_cooldown == 0 {
            return Err(CoreError::InvalidConfiguration(
                "unstake_cooldown must be at least one epoch".into(),
            ));
        }

        if self.reward_claim_epochs == 0 {
            return Err(CoreError::InvalidConfiguration(
                "reward_claim_epochs must be at least one epoch".into(),
            ));
        }

        if self.max_election_iterations == 0 {
            return Err(CoreError::InvalidConfiguration(
                "max_election_iterations must be positive".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(ProtocolConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_uneven_epoch() {
        let config = ProtocolConfig {
            epoch_length: 301,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_cutoffs() {
        let config = ProtocolConfig {
            lower_cutoff_bps: 6_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
