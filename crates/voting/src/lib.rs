// voting/src/lib.rs

//! Commit-Reveal Store
//!
//! This crate provides:
//! - Commitment hashing binding a Merkle root, a secret and the staker address
//! - Client-side reveal batches with one inclusion proof per vote
//! - The per-epoch commit and reveal state machine
//! - Stake-weighted tallies per job

pub mod commitment;
pub mod store;

pub use commitment::{commitment_hash, RevealBatch, RevealRequest};
pub use store::{RevealRecord, Tally, VoteStore};

use oracle_core::{AssetId, CoreError, Epoch, ErrorKind, StakerId};
use oracle_crypto::CryptoError;

/// Result type for voting operations
pub type VotingResult<T> = Result<T, VotingError>;

/// Errors that can occur while committing or revealing
#[derive(Debug, thiserror::Error)]
pub enum VotingError {
    #[error("Staker {staker_id} already committed in epoch {epoch}")]
    AlreadyCommitted { epoch: Epoch, staker_id: StakerId },

    #[error("Staker {staker_id} has no commitment in epoch {epoch}")]
    NotCommitted { epoch: Epoch, staker_id: StakerId },

    #[error("Staker {staker_id} already revealed in epoch {epoch}")]
    AlreadyRevealed { epoch: Epoch, staker_id: StakerId },

    #[error("Commitment must not be the zero hash")]
    EmptyCommitment,

    #[error("Reveal carries no votes")]
    EmptyReveal,

    #[error("Reveal has {values} values but {proofs} proofs")]
    LengthMismatch { values: usize, proofs: usize },

    #[error("Job {0} revealed more than once")]
    DuplicateJob(AssetId),

    #[error("Reveal weight must be positive")]
    ZeroWeight,

    #[error("Reveal for staker {staker_id} does not match its commitment in epoch {epoch}")]
    CommitmentMismatch { epoch: Epoch, staker_id: StakerId },

    #[error("Merkle proof for job {job_id} does not match the revealed root")]
    InvalidProof { job_id: AssetId },

    #[error("Reveal attempted during the commit phase of epoch {0}")]
    EarlyReveal(Epoch),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl VotingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VotingError::CommitmentMismatch { .. } | VotingError::InvalidProof { .. } => {
                ErrorKind::Integrity
            }
            VotingError::EarlyReveal(_) => ErrorKind::Phase,
            VotingError::Core(e) => e.kind(),
            _ => ErrorKind::Validation,
        }
    }
}
