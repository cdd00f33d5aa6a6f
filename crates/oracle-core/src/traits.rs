// oracle-core/src/traits.rs

//! Read-only views one component exposes to another.
//!
//! The stake ledger and the vote store are the only implementors; the block
//! engine is written against these traits so it never holds either.

use crate::{Amount, AssetId, Epoch, StakerId, Vote};
use oracle_crypto::Address;

pub trait StakeReader {
    fn stake_of(&self, staker_id: StakerId) -> Option<Amount>;

    fn staker_id_of(&self, address: &Address) -> Option<StakerId>;

    fn num_stakers(&self) -> u64;

    /// Largest stake held by any staker
    fn biggest_stake(&self) -> Option<Amount>;

    fn epoch_last_revealed(&self, staker_id: StakerId) -> Option<Epoch>;
}

pub trait VoteReader {
    fn vote(&self, epoch: Epoch, staker_id: StakerId, job_id: AssetId) -> Option<Vote>;

    /// Accumulated weight behind `value` for `(epoch, job_id)`
    fn vote_weight(&self, epoch: Epoch, job_id: AssetId, value: &Amount) -> Amount;

    fn total_stake_revealed(&self, epoch: Epoch, job_id: AssetId) -> Amount;

    fn has_revealed(&self, epoch: Epoch, staker_id: StakerId) -> bool;
}
