// staking/src/lib.rs

//! Stake Ledger
//!
//! Holds every staker's identity and locked stake and is the only place
//! stake moves:
//! - stake / unstake / withdraw with a cool-down and a release window
//! - inactivity and vote-accuracy penalties feeding the reward pool
//! - per-epoch reward buckets shared by accurate revealers
//! - block rewards for confirmed proposers
//! - slashing with a bounty for the reporter

pub mod ledger;
pub mod penalties;
pub mod rewards;
pub mod slashing;
pub mod staker;

pub use ledger::StakeLedger;
pub use penalties::{inactivity_decay, RevealScore, Settlement};
pub use rewards::RewardBucket;
pub use slashing::{SlashDistribution, SlashReason, SlashRecord};
pub use staker::Staker;

use oracle_core::{Amount, CoreError, Epoch, ErrorKind, StakerId};

/// Result type for staking operations
pub type StakingResult<T> = Result<T, StakingError>;

/// Errors that can occur during staking operations
#[derive(Debug, thiserror::Error)]
pub enum StakingError {
    #[error("Amount must be greater than zero")]
    ZeroAmount,

    #[error("Staker not found: {0}")]
    StakerNotFound(String),

    #[error("Stake below minimum: required {required}, provided {provided}")]
    BelowMinimum { required: Amount, provided: Amount },

    #[error("Insufficient stake: required {required}, provided {provided}")]
    InsufficientStake { required: Amount, provided: Amount },

    #[error("Staker {staker_id} already has a pending unstake request")]
    AlreadyUnstaking { staker_id: StakerId },

    #[error("Staker {staker_id} cannot stake while unstaking (withdraw open until epoch {withdraw_after})")]
    UnstakeInProgress { staker_id: StakerId, withdraw_after: Epoch },

    #[error("Staker {staker_id} has no unstake request")]
    NoUnstakeRequest { staker_id: StakerId },

    #[error("Too early: staker {staker_id} may withdraw from epoch {unstake_after}, now {epoch}")]
    TooEarly { staker_id: StakerId, epoch: Epoch, unstake_after: Epoch },

    #[error("Withdraw window for staker {staker_id} closed after epoch {withdraw_after}")]
    WithdrawWindowLapsed { staker_id: StakerId, withdraw_after: Epoch },

    #[error("Stake overflow: {0}")]
    Overflow(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl StakingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StakingError::ZeroAmount
            | StakingError::StakerNotFound(_)
            | StakingError::AlreadyUnstaking { .. }
            | StakingError::NoUnstakeRequest { .. }
            | StakingError::Overflow(_) => ErrorKind::Validation,
            StakingError::BelowMinimum { .. }
            | StakingError::InsufficientStake { .. }
            | StakingError::UnstakeInProgress { .. }
            | StakingError::TooEarly { .. }
            | StakingError::WithdrawWindowLapsed { .. } => ErrorKind::Economic,
            StakingError::Core(e) => e.kind(),
        }
    }
}
