// oracle-core/src/lib.rs

//! Core data structures shared by every oracle component
//!
//! This crate provides:
//! - Bounded 256-bit token amounts and id types
//! - The epoch clock and its commit/reveal/propose/dispute/confirm phases
//! - Liquid token balances
//! - Protocol configuration
//! - The append-only event log
//! - Stake-weighted aggregation math
//! - Read-only views other components consume

pub mod aggregation;
pub mod balances;
pub mod clock;
pub mod config;
pub mod events;
pub mod traits;
pub mod types;

pub use aggregation::{aggregate, reaches_bps, weighted_percentile, AggregationMethod};
pub use balances::Balances;
pub use clock::{EpochClock, Moment, Phase};
pub use config::ProtocolConfig;
pub use events::{EventLog, LogEntry, OracleEvent, StakeChangeReason};
pub use traits::{StakeReader, VoteReader};
pub use types::*;

use oracle_crypto::Address;
use std::fmt;

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Coarse classification every component error maps onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// Bad input shape, zero amounts, duplicate registration
    Validation,
    /// Operation attempted outside its epoch window
    Phase,
    /// Commitment or Merkle proof mismatch
    Integrity,
    /// Insufficient stake or balance, cool-down not elapsed
    Economic,
    /// Disputed or otherwise invalid block
    Consensus,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Phase => "phase",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Economic => "economic",
            ErrorKind::Consensus => "consensus",
        };
        f.write_str(name)
    }
}

/// Errors raised by the clock, balances and configuration
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Height {height} is before genesis height {genesis}")]
    BeforeGenesis { height: u64, genesis: u64 },

    #[error("Wrong epoch: current epoch is {current}, provided {provided}")]
    WrongEpoch { current: Epoch, provided: Epoch },

    #[error("Wrong phase: {operation} is not allowed during {actual:?}")]
    WrongPhase { operation: &'static str, actual: Phase },

    #[error("Insufficient balance for {address}: required {required}, available {available}")]
    InsufficientBalance {
        address: Address,
        required: Amount,
        available: Amount,
    },

    #[error("Amount overflow: {0}")]
    Overflow(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::BeforeGenesis { .. }
            | CoreError::WrongEpoch { .. }
            | CoreError::WrongPhase { .. } => ErrorKind::Phase,
            CoreError::InsufficientBalance { .. } => ErrorKind::Economic,
            CoreError::Overflow(_) | CoreError::InvalidConfiguration(_) => ErrorKind::Validation,
        }
    }
}
