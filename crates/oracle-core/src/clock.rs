// oracle-core/src/clock.rs

use crate::{BlockNumber, CoreError, CoreResult, Epoch, Timestamp};
use serde::{Deserialize, Serialize};

/// Sub-windows of an epoch, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    Commit,
    Reveal,
    Propose,
    Dispute,
    Confirm,
}

impl Phase {
    pub const COUNT: u64 = 5;

    pub const ALL: [Phase; 5] = [
        Phase::Commit,
        Phase::Reveal,
        Phase::Propose,
        Phase::Dispute,
        Phase::Confirm,
    ];

    pub fn from_index(index: u64) -> Phase {
        Self::ALL[(index % Self::COUNT) as usize]
    }

    pub fn index(&self) -> u64 {
        *self as u64
    }
}

/// Maps ledger heights onto epochs and phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochClock {
    genesis_height: BlockNumber,
    epoch_length: u64,
}

impl EpochClock {
    pub fn new(genesis_height: BlockNumber, epoch_length: u64) -> CoreResult<Self> {
        if epoch_length == 0 || epoch_length % Phase::COUNT != 0 {
            return Err(CoreError::InvalidConfiguration(format!(
                "epoch length {} must be a positive multiple of {}",
                epoch_length,
                Phase::COUNT
            )));
        }
        Ok(Self {
            genesis_height,
            epoch_length,
        })
    }

    pub fn epoch_length(&self) -> u64 {
        self.epoch_length
    }

    pub fn phase_length(&self) -> u64 {
        self.epoch_length / Phase::COUNT
    }

    pub fn genesis_height(&self) -> BlockNumber {
        self.genesis_height
    }

    fn offset(&self, height: BlockNumber) -> CoreResult<u64> {
        height
            .checked_sub(self.genesis_height)
            .ok_or(CoreError::BeforeGenesis {
                height,
                genesis: self.genesis_height,
            })
    }

    pub fn epoch(&self, height: BlockNumber) -> CoreResult<Epoch> {
        Ok(self.offset(height)? / self.epoch_length)
    }

    pub fn phase(&self, height: BlockNumber) -> CoreResult<Phase> {
        let within = self.offset(height)? % self.epoch_length;
        Ok(Phase::from_index(within / self.phase_length()))
    }

    /// First height of `phase` in `epoch`
    pub fn height_of(&self, epoch: Epoch, phase: Phase) -> BlockNumber {
        self.genesis_height + epoch * self.epoch_length + phase.index() * self.phase_length()
    }

    pub fn moment(&self, height: BlockNumber, timestamp: Timestamp) -> CoreResult<Moment> {
        Ok(Moment {
            height,
            epoch: self.epoch(height)?,
            phase: self.phase(height)?,
            timestamp,
        })
    }
}

/// Snapshot of the clock taken once per transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Moment {
    pub height: BlockNumber,
    pub epoch: Epoch,
    pub phase: Phase,
    pub timestamp: Timestamp,
}

impl Moment {
    /// Reject operations addressed to any epoch but the current one
    pub fn require_epoch(&self, epoch: Epoch) -> CoreResult<()> {
        if epoch != self.epoch {
            return Err(CoreError::WrongEpoch {
                current: self.epoch,
                provided: epoch,
            });
        }
        Ok(())
    }

    pub fn require_phase(&self, operation: &'static str, allowed: &[Phase]) -> CoreResult<()> {
        if !allowed.contains(&self.phase) {
            return Err(CoreError::WrongPhase {
                operation,
                actual: self.phase,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_and_phase() {
        let clock = EpochClock::new(100, 50).unwrap();
        assert_eq!(clock.epoch(100).unwrap(), 0);
        assert_eq!(clock.phase(100).unwrap(), Phase::Commit);
        assert_eq!(clock.phase(110).unwrap(), Phase::Reveal);
        assert_eq!(clock.phase(149).unwrap(), Phase::Confirm);
        assert_eq!(clock.epoch(150).unwrap(), 1);
        assert_eq!(clock.phase(150).unwrap(), Phase::Commit);
    }

    #[test]
    fn test_before_genesis() {
        let clock = EpochClock::new(100, 50).unwrap();
        assert!(matches!(clock.epoch(99), Err(CoreError::BeforeGenesis { .. })));
    }

    #[test]
    fn test_height_of_round_trips() {
        let clock = EpochClock::new(7, 25).unwrap();
        for phase in Phase::ALL {
            let height = clock.height_of(3, phase);
            assert_eq!(clock.epoch(height).unwrap(), 3);
            assert_eq!(clock.phase(height).unwrap(), phase);
        }
    }

    #[test]
    fn test_invalid_epoch_length() {
        assert!(EpochClock::new(0, 12).is_err());
        assert!(EpochClock::new(0, 0).is_err());
    }

    #[test]
    fn test_moment_guards() {
        let clock = EpochClock::new(0, 10).unwrap();
        let moment = clock.moment(12, 0).unwrap();
        assert!(moment.require_epoch(1).is_ok());
        assert!(moment.require_epoch(0).is_err());
        assert!(moment.require_phase("reveal", &[Phase::Reveal]).is_ok());
        assert!(moment.require_phase("commit", &[Phase::Commit]).is_err());
    }
}
