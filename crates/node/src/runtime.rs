// node/src/runtime.rs

use crate::{
    client, NodeConfig, Oracle, OracleClient, RevealOutcome, SharedOracle, SimulationConfig,
    StakerClient,
};
use consensus::{BlockProposal, DisputeOutcome, ElectionOdds};
use futures::future::join_all;
use oracle_core::{AggregationMethod, Amount, AssetId, Epoch, JobVote, Phase, StakeReader};
use oracle_crypto::Address;
use rand::{rngs::StdRng, Rng, SeedableRng};
use registry::JobSpec;
use serde::Serialize;

/// What a simulation run observed
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationReport {
    pub epochs: u64,
    pub commits: u64,
    pub reveals: u64,
    pub proposals: u64,
    pub confirmed_blocks: u64,
    pub empty_epochs: u64,
    pub invalidated_blocks: u64,
    /// Transactions rejected by the oracle
    pub rejected: u64,
    pub total_locked: Amount,
    pub total_slashed: Amount,
    pub reward_pool: Amount,
    pub stake_gini: f64,
}

struct Participant {
    client: StakerClient,
    honest: bool,
}

/// Drives stakers through every phase of consecutive epochs.
///
/// Each phase spawns one task per staker against the shared oracle, so
/// transactions race for the lock the way independent clients would.
pub struct Simulation {
    config: SimulationConfig,
    oracle: SharedOracle,
    participants: Vec<Participant>,
    jobs: Vec<AssetId>,
    rng: StdRng,
}

impl Simulation {
    /// Build the genesis state: jobs, a median collection over them and
    /// the staked participants
    pub fn new(config: &NodeConfig, genesis_timestamp: u64) -> anyhow::Result<Self> {
        let sim = config.simulation.clone();
        let mut rng = StdRng::seed_from_u64(sim.seed);
        let mut oracle = Oracle::new(config.protocol.clone(), genesis_timestamp)?
            .with_block_time(config.block_time_seconds);
        let epoch = oracle.now().epoch;

        let creator = Address::derive(b"job-creator");
        let funding = sim
            .job_credit
            .mul_div(&Amount::from_u64(sim.jobs as u64 + 1), &Amount::from_u64(1))
            .unwrap_or_default();
        oracle.mint(creator, &funding)?;

        let mut jobs = Vec::with_capacity(sim.jobs);
        for i in 0..sim.jobs {
            let spec = JobSpec {
                url: format!("https://feeds.example.org/pair/{i}"),
                selector: "$.last".into(),
                name: format!("feed-{i}"),
                repeat: true,
            };
            jobs.push(oracle.create_job(creator, spec, sim.job_credit.clone())?);
        }
        if !jobs.is_empty() {
            oracle.create_collection(
                creator,
                "feed-index".into(),
                AggregationMethod::Median,
                jobs.clone(),
                sim.job_credit.clone(),
            )?;
        }

        let min_stake = sim
            .min_stake
            .max(config.protocol.min_stake.to_u64_saturating());
        let max_stake = sim.max_stake.max(min_stake);
        let dishonest = sim.stakers * usize::from(sim.dishonest_percent.min(100)) / 100;

        let mut participants = Vec::with_capacity(sim.stakers);
        for i in 0..sim.stakers {
            let address = Address::derive(format!("staker-{i}").as_bytes());
            let stake = rng.gen_range(min_stake..=max_stake);
            oracle.mint(address, &sim.initial_balance)?;
            oracle.stake(address, epoch, Amount::from_u64(stake))?;
            participants.push(Participant {
                client: StakerClient::new(address),
                honest: i >= dishonest,
            });
        }

        tracing::info!(
            "✓ Simulation initialized: {} stakers ({} dishonest), {} jobs",
            participants.len(),
            dishonest,
            jobs.len()
        );

        Ok(Self {
            config: sim,
            oracle: SharedOracle::new(oracle),
            participants,
            jobs,
            rng,
        })
    }

    pub fn oracle(&self) -> &SharedOracle {
        &self.oracle
    }

    pub async fn run(&mut self) -> anyhow::Result<SimulationReport> {
        let mut report = SimulationReport::default();
        let start = self.oracle.moment().await.epoch;

        for epoch in start..start + self.config.epochs {
            self.run_epoch(epoch, &mut report).await?;
            report.epochs += 1;
        }

        self.oracle
            .read(|oracle| {
                let ledger = oracle.ledger();
                let stakes: Vec<Amount> = ledger.stakers().map(|s| s.stake.clone()).collect();
                report.total_locked = ledger.total_locked().clone();
                report.total_slashed = ledger.total_slashed().clone();
                report.reward_pool = ledger.reward_pool().clone();
                report.stake_gini = ElectionOdds::gini_coefficient(&stakes);

                if let Some((_, biggest)) = ledger.biggest_staker() {
                    for staker in ledger.stakers() {
                        tracing::debug!(
                            "Staker {} stake {}: ~{:.1} iterations per election",
                            staker.id,
                            staker.stake,
                            ElectionOdds::expected_iterations(
                                &staker.stake,
                                &biggest,
                                ledger.num_stakers()
                            )
                        );
                    }
                }
            })
            .await;

        tracing::info!(
            "Simulation finished: {} epochs, {} confirmed, {} invalidated, gini {:.3}",
            report.epochs,
            report.confirmed_blocks,
            report.invalidated_blocks,
            report.stake_gini
        );
        Ok(report)
    }

    async fn run_epoch(&mut self, epoch: Epoch, report: &mut SimulationReport) -> anyhow::Result<()> {
        self.oracle.advance_to_phase(epoch, Phase::Commit).await?;
        let committed = self.commit_phase(epoch, report).await?;

        self.oracle.advance_to_phase(epoch, Phase::Reveal).await?;
        let revealed = self.reveal_phase(epoch, &committed, report).await?;

        self.oracle.advance_to_phase(epoch, Phase::Propose).await?;
        self.propose_phase(epoch, &revealed, report).await?;

        self.oracle.advance_to_phase(epoch, Phase::Dispute).await?;
        self.dispute_phase(epoch, report).await?;

        self.oracle.advance_to_phase(epoch, Phase::Confirm).await?;
        match self.oracle.confirm_block(epoch).await {
            Ok(Some(index)) => {
                report.confirmed_blocks += 1;
                tracing::info!("Epoch {}: block {} confirmed", epoch, index);
            }
            Ok(None) => {
                report.empty_epochs += 1;
                tracing::info!("Epoch {}: nothing to confirm", epoch);
            }
            Err(e) => {
                report.rejected += 1;
                tracing::warn!("Epoch {}: confirm failed: {}", epoch, e);
            }
        }
        Ok(())
    }

    /// Ground truth of a job in an epoch; honest stakers observe it with a little noise
    fn observe(&mut self, job_id: AssetId, epoch: Epoch, honest: bool) -> u64 {
        let truth = 1_000 * job_id + 10 * epoch;
        let noise = self.rng.gen_range(0..=3);
        if honest {
            truth + noise
        } else {
            truth * 3 + noise
        }
    }

    async fn commit_phase(
        &mut self,
        epoch: Epoch,
        report: &mut SimulationReport,
    ) -> anyhow::Result<Vec<bool>> {
        let mut handles = Vec::with_capacity(self.participants.len());
        for i in 0..self.participants.len() {
            let honest = self.participants[i].honest;
            let votes: Vec<JobVote> = self
                .jobs
                .clone()
                .into_iter()
                .map(|job_id| JobVote::new(job_id, self.observe(job_id, epoch, honest)))
                .collect();
            if votes.is_empty() {
                continue;
            }

            let participant = &mut self.participants[i];
            let commitment = participant
                .client
                .prepare_commit(epoch, votes, &mut self.rng)?;
            let address = participant.client.address();
            let oracle = self.oracle.clone();
            handles.push(tokio::spawn(async move {
                (i, oracle.commit(address, epoch, commitment).await)
            }));
        }

        let mut committed = vec![false; self.participants.len()];
        for joined in join_all(handles).await {
            let (i, result) = joined?;
            match result {
                Ok(()) => {
                    committed[i] = true;
                    report.commits += 1;
                }
                Err(e) => {
                    report.rejected += 1;
                    self.participants[i].client.clear();
                    tracing::debug!("Staker {} skipped epoch {}: {}", i, epoch, e);
                }
            }
        }
        Ok(committed)
    }

    async fn reveal_phase(
        &mut self,
        epoch: Epoch,
        committed: &[bool],
        report: &mut SimulationReport,
    ) -> anyhow::Result<Vec<bool>> {
        let mut handles = Vec::new();
        for (i, participant) in self.participants.iter().enumerate() {
            if !committed[i] {
                continue;
            }
            let Some(request) = participant.client.reveal_request(epoch)? else {
                continue;
            };
            let address = participant.client.address();
            let oracle = self.oracle.clone();
            handles.push(tokio::spawn(async move {
                (i, oracle.reveal(address, address, request).await)
            }));
        }

        let mut revealed = vec![false; self.participants.len()];
        for joined in join_all(handles).await {
            let (i, result) = joined?;
            match result {
                Ok(RevealOutcome::Revealed { .. }) => {
                    revealed[i] = true;
                    report.reveals += 1;
                }
                Ok(RevealOutcome::Snitched(_)) => {}
                Err(e) => {
                    report.rejected += 1;
                    tracing::warn!("Staker {} failed to reveal in epoch {}: {}", i, epoch, e);
                }
            }
            self.participants[i].client.clear();
        }
        Ok(revealed)
    }

    async fn propose_phase(
        &mut self,
        epoch: Epoch,
        revealed: &[bool],
        report: &mut SimulationReport,
    ) -> anyhow::Result<()> {
        let mut handles = Vec::new();
        for (i, participant) in self.participants.iter().enumerate() {
            if !revealed[i] {
                continue;
            }
            let address = participant.client.address();
            let honest = participant.honest;
            let oracle = self.oracle.clone();
            handles.push(tokio::spawn(async move {
                let staker_id = oracle.read(|o| o.staker_id(&address)).await?;
                let mut proposal = oracle.honest_proposal(staker_id, epoch).await?;
                if !honest {
                    tamper(&mut proposal);
                }
                Some((i, oracle.propose(address, proposal).await))
            }));
        }

        for joined in join_all(handles).await {
            let Some((i, result)) = joined? else {
                continue;
            };
            match result {
                Ok(index) => {
                    report.proposals += 1;
                    tracing::debug!("Staker {} proposed block {} in epoch {}", i, index, epoch);
                }
                Err(e) => {
                    report.rejected += 1;
                    tracing::debug!("Staker {} proposal rejected: {}", i, e);
                }
            }
        }
        Ok(())
    }

    /// An honest watcher replays the votes of the first job the leading
    /// block gets wrong, until the leading block is correct or none is left
    async fn dispute_phase(&mut self, epoch: Epoch, report: &mut SimulationReport) -> anyhow::Result<()> {
        let Some(watcher) = self
            .participants
            .iter()
            .find(|p| p.honest)
            .map(|p| p.client.address())
        else {
            return Ok(());
        };

        loop {
            let target = self
                .oracle
                .read(|oracle| {
                    disputed_job(oracle, epoch)
                        .map(|job_id| (job_id, client::sorted_values(oracle, epoch, job_id)))
                })
                .await;
            let Some((job_id, sorted)) = target else {
                return Ok(());
            };

            if let Err(e) = self.oracle.give_sorted(watcher, epoch, job_id, sorted).await {
                report.rejected += 1;
                tracing::warn!("Dispute on job {} in epoch {} failed: {}", job_id, epoch, e);
                return Ok(());
            }
            match self.oracle.reset_dispute(watcher, epoch).await {
                Ok(resolution) if resolution.outcome == DisputeOutcome::Invalidated => {
                    report.invalidated_blocks += 1;
                    tracing::info!(
                        "Epoch {}: block {} of staker {} invalidated on job {}",
                        epoch,
                        resolution.block_index,
                        resolution.proposer_id,
                        job_id
                    );
                }
                Ok(_) => return Ok(()),
                Err(e) => {
                    report.rejected += 1;
                    tracing::warn!("Reset of dispute in epoch {} failed: {}", epoch, e);
                    return Ok(());
                }
            }
        }
    }
}

/// First job whose median or cutoffs in the leading block differ from the tally
fn disputed_job(oracle: &Oracle, epoch: Epoch) -> Option<AssetId> {
    let index = oracle.blocks().leading_block(epoch)?;
    let block = oracle.get_block(epoch, index)?;
    block.job_ids.iter().enumerate().find_map(|(i, &job_id)| {
        let tally = oracle.tally(epoch, job_id)?;
        let agrees = tally.median == block.medians[i]
            && tally.lower_cutoff == block.lower_cutoffs[i]
            && tally.higher_cutoff == block.higher_cutoffs[i];
        (!agrees).then_some(job_id)
    })
}

/// Inflate the first median, keeping the cutoffs ordered
fn tamper(proposal: &mut BlockProposal) {
    let Some(median) = proposal.medians.first_mut() else {
        return;
    };
    if let Some(inflated) = median
        .checked_add(median)
        .and_then(|m| m.checked_add(&Amount::from_u64(1)))
    {
        *median = inflated;
    }
    if proposal.higher_cutoffs[0] < proposal.medians[0] {
        proposal.higher_cutoffs[0] = proposal.medians[0].clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oracle_core::ProtocolConfig;

    fn node_config(stakers: usize, dishonest_percent: u8) -> NodeConfig {
        NodeConfig {
            protocol: ProtocolConfig {
                epoch_length: 50,
                ..ProtocolConfig::default()
            },
            simulation: SimulationConfig {
                stakers,
                epochs: 3,
                jobs: 2,
                dishonest_percent,
                ..SimulationConfig::default()
            },
            ..NodeConfig::default()
        }
    }

    #[tokio::test]
    async fn test_honest_simulation_confirms_every_epoch() {
        let mut sim = Simulation::new(&node_config(5, 0), 0).unwrap();
        let report = sim.run().await.unwrap();

        assert_eq!(report.epochs, 3);
        assert_eq!(report.commits, 15);
        assert_eq!(report.reveals, 15);
        assert_eq!(report.confirmed_blocks, 3);
        assert_eq!(report.invalidated_blocks, 0);
        assert!(report.total_slashed.is_zero());

        let (result, collection) = sim
            .oracle()
            .read(|o| (o.get_result(1).cloned(), o.get_collection(3).and_then(|c| c.result.clone())))
            .await;
        // Job 1 in epoch 2 is observed around 1020
        let result = result.unwrap().to_u64_saturating();
        assert!((1_020..=1_023).contains(&result));
        assert!(collection.is_some());
    }

    #[tokio::test]
    async fn test_tampered_blocks_are_disputed() {
        let mut sim = Simulation::new(&node_config(8, 50), 0).unwrap();
        let report = sim.run().await.unwrap();

        assert_eq!(report.confirmed_blocks, 3);
        // Whatever leads after the disputes matches the tallies
        for epoch in 0..3 {
            let agrees = sim.oracle().read(|o| disputed_job(o, epoch).is_none()).await;
            assert!(agrees);
        }
        if report.invalidated_blocks > 0 {
            assert!(!report.total_slashed.is_zero());
        }
    }

    #[test]
    fn test_tamper_keeps_cutoff_order() {
        let mut proposal = BlockProposal {
            epoch: 0,
            job_ids: vec![1],
            medians: vec![Amount::from_u64(10)],
            lower_cutoffs: vec![Amount::from_u64(9)],
            higher_cutoffs: vec![Amount::from_u64(12)],
            iteration: 0,
            biggest_staker_id: 1,
        };
        tamper(&mut proposal);
        assert_eq!(proposal.medians[0], Amount::from_u64(21));
        assert_eq!(proposal.higher_cutoffs[0], Amount::from_u64(21));
        assert!(proposal.validate().is_ok());
    }
}
