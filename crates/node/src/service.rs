// node/src/service.rs

use crate::{client, Oracle, OracleResult, RevealOutcome};
use async_trait::async_trait;
use consensus::{BlockProposal, DisputeResolution, ProposedBlock};
use oracle_core::{Amount, AssetId, BlockIndex, Epoch, Moment, Phase, StakerId, Vote};
use oracle_crypto::{Address, Hash};
use staking::Staker;
use std::sync::Arc;
use tokio::sync::RwLock;
use voting::RevealRequest;

/// The transactions and reads an independent staker client submits.
///
/// Calls are applied one at a time; an operation outside its phase fails
/// immediately and retrying later is the caller's business.
#[async_trait]
pub trait OracleClient: Send + Sync {
    async fn moment(&self) -> Moment;

    async fn stake(&self, sender: Address, epoch: Epoch, amount: Amount) -> OracleResult<StakerId>;

    async fn unstake(&self, sender: Address, epoch: Epoch) -> OracleResult<()>;

    async fn withdraw(&self, sender: Address, epoch: Epoch) -> OracleResult<Amount>;

    async fn commit(&self, sender: Address, epoch: Epoch, commitment: Hash) -> OracleResult<()>;

    async fn reveal(
        &self,
        sender: Address,
        staker: Address,
        request: RevealRequest,
    ) -> OracleResult<RevealOutcome>;

    async fn propose(&self, sender: Address, proposal: BlockProposal) -> OracleResult<BlockIndex>;

    async fn give_sorted(
        &self,
        sender: Address,
        epoch: Epoch,
        job_id: AssetId,
        sorted: Vec<Amount>,
    ) -> OracleResult<()>;

    async fn reset_dispute(&self, sender: Address, epoch: Epoch) -> OracleResult<DisputeResolution>;

    async fn confirm_block(&self, epoch: Epoch) -> OracleResult<Option<BlockIndex>>;

    async fn get_staker(&self, staker_id: StakerId) -> Option<Staker>;

    async fn get_vote(&self, epoch: Epoch, staker_id: StakerId, job_id: AssetId) -> Option<Vote>;

    async fn get_block(&self, epoch: Epoch, index: BlockIndex) -> Option<ProposedBlock>;

    /// The block `staker_id` would propose from the tallies it can read
    async fn honest_proposal(&self, staker_id: StakerId, epoch: Epoch) -> Option<BlockProposal>;
}

/// One oracle shared by many clients; the lock serializes every transaction
#[derive(Debug, Clone)]
pub struct SharedOracle {
    inner: Arc<RwLock<Oracle>>,
}

impl SharedOracle {
    pub fn new(oracle: Oracle) -> Self {
        Self {
            inner: Arc::new(RwLock::new(oracle)),
        }
    }

    pub async fn advance_blocks(&self, blocks: u64) -> OracleResult<Moment> {
        self.inner.write().await.advance_blocks(blocks)
    }

    pub async fn advance_to_phase(&self, epoch: Epoch, phase: Phase) -> OracleResult<Moment> {
        self.inner.write().await.advance_to_phase(epoch, phase)
    }

    /// Run `f` against a consistent view of the whole state
    pub async fn read<T>(&self, f: impl FnOnce(&Oracle) -> T + Send) -> T {
        let oracle = self.inner.read().await;
        f(&oracle)
    }

    /// Run `f` as one exclusive unit, e.g. setup steps spanning several transactions
    pub async fn write<T>(&self, f: impl FnOnce(&mut Oracle) -> T + Send) -> T {
        let mut oracle = self.inner.write().await;
        f(&mut oracle)
    }

    /// Copy of the current state, e.g. for persisting
    pub async fn snapshot(&self) -> Oracle {
        self.inner.read().await.clone()
    }
}

#[async_trait]
impl OracleClient for SharedOracle {
    async fn moment(&self) -> Moment {
        self.inner.read().await.now()
    }

    async fn stake(&self, sender: Address, epoch: Epoch, amount: Amount) -> OracleResult<StakerId> {
        self.inner.write().await.stake(sender, epoch, amount)
    }

    async fn unstake(&self, sender: Address, epoch: Epoch) -> OracleResult<()> {
        self.inner.write().await.unstake(sender, epoch)
    }

    async fn withdraw(&self, sender: Address, epoch: Epoch) -> OracleResult<Amount> {
        self.inner.write().await.withdraw(sender, epoch)
    }

    async fn commit(&self, sender: Address, epoch: Epoch, commitment: Hash) -> OracleResult<()> {
        self.inner.write().await.commit(sender, epoch, commitment)
    }

    async fn reveal(
        &self,
        sender: Address,
        staker: Address,
        request: RevealRequest,
    ) -> OracleResult<RevealOutcome> {
        self.inner.write().await.reveal(sender, staker, &request)
    }

    async fn propose(&self, sender: Address, proposal: BlockProposal) -> OracleResult<BlockIndex> {
        self.inner.write().await.propose(sender, &proposal)
    }

    async fn give_sorted(
        &self,
        sender: Address,
        epoch: Epoch,
        job_id: AssetId,
        sorted: Vec<Amount>,
    ) -> OracleResult<()> {
        self.inner
            .write()
            .await
            .give_sorted(sender, epoch, job_id, &sorted)
    }

    async fn reset_dispute(&self, sender: Address, epoch: Epoch) -> OracleResult<DisputeResolution> {
        self.inner.write().await.reset_dispute(sender, epoch)
    }

    async fn confirm_block(&self, epoch: Epoch) -> OracleResult<Option<BlockIndex>> {
        self.inner.write().await.confirm_block(epoch)
    }

    async fn get_staker(&self, staker_id: StakerId) -> Option<Staker> {
        self.inner.read().await.get_staker(staker_id).cloned()
    }

    async fn get_vote(&self, epoch: Epoch, staker_id: StakerId, job_id: AssetId) -> Option<Vote> {
        self.inner.read().await.get_vote(epoch, staker_id, job_id)
    }

    async fn get_block(&self, epoch: Epoch, index: BlockIndex) -> Option<ProposedBlock> {
        self.inner.read().await.get_block(epoch, index).cloned()
    }

    async fn honest_proposal(&self, staker_id: StakerId, epoch: Epoch) -> Option<BlockProposal> {
        let oracle = self.inner.read().await;
        client::honest_proposal(&oracle, staker_id, epoch)
    }
}
