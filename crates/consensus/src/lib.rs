// consensus/src/lib.rs

//! Block Proposal Engine
//!
//! One staker per epoch iteration is elected by a stake-weighted lottery:
//! - A uniform pick among staker ids, accepted with probability stake / biggest stake
//! - Candidate blocks of per-job medians and cutoffs, ranked by iteration
//! - Disputes replaying the sorted votes of one job against the leading block
//! - Confirmation of the best valid block once per epoch

pub mod block;
pub mod dispute;
pub mod engine;
pub mod selection;

pub use block::{BlockProposal, ProposedBlock};
pub use dispute::{DisputeAccumulator, DisputeOutcome, DisputeResolution};
pub use engine::BlockEngine;
pub use selection::{epoch_seed, find_iteration, is_elected, ElectionOdds};

use oracle_core::{Amount, AssetId, BlockIndex, CoreError, Epoch, ErrorKind, StakerId};

/// Result type for consensus operations
pub type ConsensusResult<T> = Result<T, ConsensusError>;

/// Errors that can occur during consensus operations
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("Staker not found: {0}")]
    StakerNotFound(StakerId),

    #[error("Insufficient stake: required {required}, provided {provided}")]
    InsufficientStake { required: Amount, provided: Amount },

    #[error("Staker {staker_id} did not reveal in epoch {epoch}")]
    NotRevealed { epoch: Epoch, staker_id: StakerId },

    #[error("Staker {staker_id} already proposed in epoch {epoch}")]
    AlreadyProposed { epoch: Epoch, staker_id: StakerId },

    #[error("Staker {biggest_staker_id} is not bigger than the proposer")]
    NotBiggestStaker { biggest_staker_id: StakerId },

    #[error("Staker {staker_id} is not elected at iteration {iteration}")]
    NotElected { staker_id: StakerId, iteration: u64 },

    #[error("Block carries no jobs")]
    EmptyBlock,

    #[error("Block arrays are misaligned: {job_ids} jobs, {medians} medians, {lower} lower, {higher} higher cutoffs")]
    LengthMismatch {
        job_ids: usize,
        medians: usize,
        lower: usize,
        higher: usize,
    },

    #[error("Job {0} appears twice in the block")]
    DuplicateJob(AssetId),

    #[error("Cutoffs for job {0} do not bracket the median")]
    CutoffOrder(AssetId),

    #[error("Block {block_index} already confirmed for epoch {epoch}")]
    AlreadyConfirmed { epoch: Epoch, block_index: BlockIndex },

    #[error("Block {index} not found in epoch {epoch}")]
    BlockNotFound { epoch: Epoch, index: BlockIndex },

    #[error("No valid block to dispute in epoch {0}")]
    NoBlockToDispute(Epoch),

    #[error("No votes revealed for job {0}")]
    NoVotes(AssetId),

    #[error("No sorted values given for job {0}")]
    EmptyValues(AssetId),

    #[error("Values for job {0} must be strictly ascending")]
    UnsortedValues(AssetId),

    #[error("Dispute in progress for job {expected}, got job {provided}")]
    DisputeJobMismatch { expected: AssetId, provided: AssetId },

    #[error("Staker {disputer_id} has no dispute open in epoch {epoch}")]
    NoDispute { epoch: Epoch, disputer_id: StakerId },

    #[error("Dispute incomplete: accumulated {accumulated} of {total}")]
    IncompleteDispute { accumulated: Amount, total: Amount },

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl ConsensusError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConsensusError::InsufficientStake { .. } => ErrorKind::Economic,
            ConsensusError::NotElected { .. } | ConsensusError::AlreadyConfirmed { .. } => {
                ErrorKind::Consensus
            }
            ConsensusError::Core(e) => e.kind(),
            _ => ErrorKind::Validation,
        }
    }
}
