// node/src/lib.rs

//! The oracle node
//!
//! Wires the stake ledger, vote store, block engine and registry into one
//! [`Oracle`] state machine, shares it between async staker clients and
//! drives whole epochs in a simulation runtime.

pub mod client;
pub mod config;
pub mod oracle;
pub mod runtime;
pub mod service;
pub mod snapshot;

pub use client::{election_iteration, honest_proposal, sorted_values, StakerClient};
pub use config::{NodeConfig, SimulationConfig};
pub use oracle::{AppliedBlock, Oracle, RevealOutcome};
pub use runtime::{Simulation, SimulationReport};
pub use service::{OracleClient, SharedOracle};
pub use snapshot::{export_events, load_snapshot, save_snapshot};

use consensus::ConsensusError;
use oracle_core::{Amount, AssetId, BlockNumber, CoreError, ErrorKind};
use oracle_crypto::Address;
use registry::RegistryError;
use staking::StakingError;
use voting::VotingError;

/// Result type for oracle transactions
pub type OracleResult<T> = Result<T, OracleError>;

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("No staker registered for address {0}")]
    UnknownStaker(Address),

    #[error("Asset {0} is not a registered job")]
    UnknownJob(AssetId),

    #[error("{sender} may only reveal for {staker} during the commit phase")]
    ThirdPartyReveal { sender: Address, staker: Address },

    #[error("Clock cannot move back from height {current} to {requested}")]
    ClockRewind {
        current: BlockNumber,
        requested: BlockNumber,
    },

    #[error("Stake after settlement {provided} is below the minimum {required}")]
    BelowMinimumAfterSettlement { required: Amount, provided: Amount },

    #[error("Staking error: {0}")]
    Staking(#[from] StakingError),

    #[error("Voting error: {0}")]
    Voting(#[from] VotingError),

    #[error("Consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl OracleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OracleError::UnknownStaker(_)
            | OracleError::UnknownJob(_)
            | OracleError::ThirdPartyReveal { .. }
            | OracleError::ClockRewind { .. } => ErrorKind::Validation,
            OracleError::BelowMinimumAfterSettlement { .. } => ErrorKind::Economic,
            OracleError::Staking(e) => e.kind(),
            OracleError::Voting(e) => e.kind(),
            OracleError::Consensus(e) => e.kind(),
            OracleError::Registry(e) => e.kind(),
            OracleError::Core(e) => e.kind(),
        }
    }
}
