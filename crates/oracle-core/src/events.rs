// oracle-core/src/events.rs

use crate::{
    AggregationMethod, Amount, AssetId, BlockIndex, BlockNumber, Epoch, JobVote, Moment,
    StakerId, Timestamp,
};
use oracle_crypto::{Address, Hash};
use serde::{Deserialize, Serialize};

/// Why a staker's stake moved outside stake/unstake/withdraw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StakeChangeReason {
    InactivityPenalty,
    VotePenalty,
    Reward,
    BlockReward,
    BlockRewardRevoked,
    Slash,
}

/// Events produced for external consumption; each carries the post-state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleEvent {
    Staked {
        epoch: Epoch,
        staker_id: StakerId,
        address: Address,
        previous_stake: Amount,
        new_stake: Amount,
        timestamp: Timestamp,
    },
    Unstaked {
        epoch: Epoch,
        staker_id: StakerId,
        stake: Amount,
        unstake_after: Epoch,
        withdraw_after: Epoch,
        timestamp: Timestamp,
    },
    Withdrew {
        epoch: Epoch,
        staker_id: StakerId,
        amount: Amount,
        new_stake: Amount,
        timestamp: Timestamp,
    },
    StakeChange {
        epoch: Epoch,
        staker_id: StakerId,
        previous_stake: Amount,
        new_stake: Amount,
        reason: StakeChangeReason,
        timestamp: Timestamp,
    },
    Committed {
        epoch: Epoch,
        staker_id: StakerId,
        commitment: Hash,
        timestamp: Timestamp,
    },
    Revealed {
        epoch: Epoch,
        staker_id: StakerId,
        root: Hash,
        weight: Amount,
        votes: Vec<JobVote>,
        timestamp: Timestamp,
    },
    Proposed {
        epoch: Epoch,
        block_index: BlockIndex,
        staker_id: StakerId,
        job_ids: Vec<AssetId>,
        medians: Vec<Amount>,
        lower_cutoffs: Vec<Amount>,
        higher_cutoffs: Vec<Amount>,
        iteration: u64,
        biggest_staker_id: StakerId,
        biggest_stake: Amount,
        timestamp: Timestamp,
    },
    BlockConfirmed {
        epoch: Epoch,
        block_index: BlockIndex,
        proposer_id: StakerId,
        job_ids: Vec<AssetId>,
        medians: Vec<Amount>,
        timestamp: Timestamp,
    },
    BlockDisputed {
        epoch: Epoch,
        block_index: BlockIndex,
        proposer_id: StakerId,
        disputer_id: StakerId,
        job_id: AssetId,
        was_confirmed: bool,
        timestamp: Timestamp,
    },
    JobCreated {
        id: AssetId,
        epoch: Epoch,
        url: String,
        selector: String,
        name: String,
        repeat: bool,
        creator: Address,
        credit: Amount,
        timestamp: Timestamp,
    },
    JobReported {
        id: AssetId,
        epoch: Epoch,
        value: Amount,
        fulfilled: bool,
        timestamp: Timestamp,
    },
    CollectionCreated {
        id: AssetId,
        epoch: Epoch,
        name: String,
        aggregation_method: AggregationMethod,
        job_ids: Vec<AssetId>,
        creator: Address,
        credit: Amount,
        timestamp: Timestamp,
    },
    CollectionReported {
        id: AssetId,
        epoch: Epoch,
        value: Amount,
        timestamp: Timestamp,
    },
    CollectionUpdated {
        id: AssetId,
        epoch: Epoch,
        job_ids: Vec<AssetId>,
        timestamp: Timestamp,
    },
    /// A result written by an invalidated block was rolled back
    ResultReverted {
        id: AssetId,
        epoch: Epoch,
        restored: Option<Amount>,
        timestamp: Timestamp,
    },
}

impl OracleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OracleEvent::Staked { .. } => "Staked",
            OracleEvent::Unstaked { .. } => "Unstaked",
            OracleEvent::Withdrew { .. } => "Withdrew",
            OracleEvent::StakeChange { .. } => "StakeChange",
            OracleEvent::Committed { .. } => "Committed",
            OracleEvent::Revealed { .. } => "Revealed",
            OracleEvent::Proposed { .. } => "Proposed",
            OracleEvent::BlockConfirmed { .. } => "BlockConfirmed",
            OracleEvent::BlockDisputed { .. } => "BlockDisputed",
            OracleEvent::JobCreated { .. } => "JobCreated",
            OracleEvent::JobReported { .. } => "JobReported",
            OracleEvent::CollectionCreated { .. } => "CollectionCreated",
            OracleEvent::CollectionReported { .. } => "CollectionReported",
            OracleEvent::CollectionUpdated { .. } => "CollectionUpdated",
            OracleEvent::ResultReverted { .. } => "ResultReverted",
        }
    }
}

/// One emitted event, tagged with the transaction that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub sequence: u64,
    pub transaction: u64,
    pub height: BlockNumber,
    pub event: OracleEvent,
}

/// Append-only, replayable event history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    entries: Vec<LogEntry>,
    transaction: u64,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new transaction; subsequent events are tagged with it
    pub fn begin_transaction(&mut self) -> u64 {
        self.transaction += 1;
        self.transaction
    }

    pub fn current_transaction(&self) -> u64 {
        self.transaction
    }

    pub fn emit(&mut self, moment: &Moment, event: OracleEvent) {
        tracing::debug!(event = event.name(), height = moment.height, "event emitted");
        let sequence = self.entries.len() as u64;
        self.entries.push(LogEntry {
            sequence,
            transaction: self.transaction,
            height: moment.height,
            event,
        });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Entries with `sequence >= from`, for consumers resuming a replay
    pub fn entries_since(&self, from: u64) -> &[LogEntry] {
        let start = (from as usize).min(self.entries.len());
        &self.entries[start..]
    }

    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a LogEntry> + 'a {
        self.entries.iter().filter(move |e| e.event.name() == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
