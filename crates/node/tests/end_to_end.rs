// node/tests/end_to_end.rs

use consensus::{BlockProposal, ConsensusError, DisputeOutcome};
use node::{client, Oracle, OracleClient, OracleError, RevealOutcome, SharedOracle};
use oracle_core::{
    Amount, AssetId, Epoch, ErrorKind, JobVote, OracleEvent, Phase, ProtocolConfig,
    StakeChangeReason, StakerId, Vote, VoteReader,
};
use oracle_crypto::{Address, Hash};
use registry::JobSpec;
use staking::SlashReason;
use voting::{RevealBatch, RevealRequest};

struct World {
    oracle: Oracle,
    job: AssetId,
}

impl World {
    fn new() -> Self {
        let config = ProtocolConfig {
            epoch_length: 50,
            ..ProtocolConfig::default()
        };
        let mut oracle = Oracle::new(config, 1_700_000_000).unwrap();
        let creator = address("creator");
        oracle.mint(creator, &Amount::from_u64(10_000)).unwrap();
        let job = oracle
            .create_job(
                creator,
                JobSpec {
                    url: "https://api.example.com/eth-usd".into(),
                    selector: "$.price".into(),
                    name: "eth-usd".into(),
                    repeat: true,
                },
                Amount::from_u64(500),
            )
            .unwrap();
        Self { oracle, job }
    }

    fn fund_and_stake(&mut self, name: &str, epoch: Epoch, stake: u64) -> StakerId {
        let who = address(name);
        self.oracle.mint(who, &Amount::from_u64(100_000)).unwrap();
        self.oracle.stake(who, epoch, Amount::from_u64(stake)).unwrap()
    }

    fn at(&mut self, epoch: Epoch, phase: Phase) {
        self.oracle.advance_to_phase(epoch, phase).unwrap();
    }

    fn commit(&mut self, name: &str, epoch: Epoch, value: u64) -> RevealRequest {
        let job = self.job;
        self.commit_votes(name, epoch, vec![JobVote::new(job, value)])
    }

    fn commit_votes(&mut self, name: &str, epoch: Epoch, votes: Vec<JobVote>) -> RevealRequest {
        let who = address(name);
        let secret = Hash::new([name.len() as u8; 32]);
        let batch = RevealBatch::new(votes).unwrap();
        self.oracle
            .commit(who, epoch, batch.commitment(&secret, &who))
            .unwrap();
        batch.request(epoch, secret).unwrap()
    }

    fn reveal(&mut self, name: &str, request: &RevealRequest) {
        let who = address(name);
        self.oracle.reveal(who, who, request).unwrap();
    }
}

fn address(name: &str) -> Address {
    Address::derive(name.as_bytes())
}

#[test]
fn test_stake_commit_reveal_records_weighted_vote() {
    let mut world = World::new();
    world.at(5, Phase::Commit);
    let a = world.fund_and_stake("alice", 5, 1_000);

    let request = world.commit("alice", 5, 42);
    world.at(5, Phase::Reveal);
    world.reveal("alice", &request);

    assert_eq!(
        world.oracle.get_vote(5, a, world.job),
        Some(Vote {
            value: Amount::from_u64(42),
            weight: Amount::from_u64(1_000),
        })
    );
    assert_eq!(
        world.oracle.total_stake_revealed(5, world.job),
        Amount::from_u64(1_000)
    );
    assert_eq!(world.oracle.events().named("Revealed").count(), 1);
}

#[test]
fn test_unstake_cooldown_then_withdraw() {
    let mut world = World::new();
    let c = world.fund_and_stake("carol", 0, 1_000);
    let cooldown = world.oracle.config().unstake_cooldown;

    world.at(10, Phase::Commit);
    world.oracle.unstake(address("carol"), 10).unwrap();
    assert_eq!(
        world.oracle.get_staker(c).unwrap().unstake_after,
        Some(10 + cooldown)
    );

    world.at(10 + cooldown - 1, Phase::Commit);
    let err = world
        .oracle
        .withdraw(address("carol"), 10 + cooldown - 1)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Economic);

    world.at(10 + cooldown, Phase::Commit);
    let withdrawn = world.oracle.withdraw(address("carol"), 10 + cooldown).unwrap();
    assert_eq!(withdrawn, Amount::from_u64(1_000));
    assert!(world.oracle.get_staker(c).unwrap().stake.is_zero());
    assert_eq!(
        world.oracle.balance_of(&address("carol")),
        Amount::from_u64(100_000)
    );
}

#[test]
fn test_failed_reveals_leave_state_untouched() {
    let mut world = World::new();
    let a = world.fund_and_stake("alice", 0, 1_000);
    world.fund_and_stake("bob", 0, 1_000);

    let request = world.commit("alice", 0, 42);
    world.at(0, Phase::Reveal);

    let votes_before = bincode::serialize(world.oracle.votes()).unwrap();
    let ledger_before = bincode::serialize(world.oracle.ledger()).unwrap();
    let events_before = world.oracle.events().len();
    let assert_untouched = |oracle: &Oracle| {
        assert_eq!(bincode::serialize(oracle.votes()).unwrap(), votes_before);
        assert_eq!(bincode::serialize(oracle.ledger()).unwrap(), ledger_before);
        assert_eq!(oracle.events().len(), events_before);
    };

    // Never committed
    let bob = address("bob");
    let batch = RevealBatch::new(vec![JobVote::new(world.job, 7u64)]).unwrap();
    let err = world
        .oracle
        .reveal(bob, bob, &batch.request(0, Hash::new([1; 32])).unwrap())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_untouched(&world.oracle);

    // Wrong secret
    let mut wrong = request.clone();
    wrong.secret = Hash::new([0xee; 32]);
    let err = world.oracle.reveal(address("alice"), address("alice"), &wrong).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Integrity);
    assert_untouched(&world.oracle);

    // Value swapped after commit
    let mut forged = request.clone();
    forged.votes[0] = JobVote::new(world.job, 43u64);
    let err = world.oracle.reveal(address("alice"), address("alice"), &forged).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Integrity);
    assert_untouched(&world.oracle);

    // The honest reveal still works once, and only once
    world.reveal("alice", &request);
    assert!(world.oracle.votes().has_revealed(0, a));
    let err = world
        .oracle
        .reveal(address("alice"), address("alice"), &request)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn test_early_self_reveal_is_phase_error() {
    let mut world = World::new();
    world.fund_and_stake("alice", 0, 1_000);
    let request = world.commit("alice", 0, 42);

    let err = world
        .oracle
        .reveal(address("alice"), address("alice"), &request)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Phase);
}

#[test]
fn test_bigger_stake_wins_election_more_often() {
    let mut world = World::new();
    let a = world.fund_and_stake("alice", 0, 1_000);
    let b = world.fund_and_stake("bob", 0, 1);

    let (mut a_wins, mut b_wins) = (0u32, 0u32);
    for epoch in 0..2_000 {
        if world.oracle.is_elected_proposer(epoch, 0, a, a) {
            a_wins += 1;
        }
        if world.oracle.is_elected_proposer(epoch, 0, a, b) {
            b_wins += 1;
        }
    }

    // A is drawn half the time and always accepted; B is drawn half the
    // time but accepted once in a thousand
    assert!(a_wins > 800, "a won {a_wins}");
    assert!(b_wins < 20, "b won {b_wins}");
    assert!(a_wins > 10 * b_wins.max(1));
}

#[test]
fn test_smaller_staker_naming_itself_biggest_is_never_elected() {
    let mut world = World::new();
    world.fund_and_stake("alice", 0, 1_000);
    let bob = world.fund_and_stake("bob", 0, 1);

    let self_named = (0..2_000)
        .filter(|&epoch| world.oracle.is_elected_proposer(epoch, 0, bob, bob))
        .count();
    assert_eq!(self_named, 0);

    let request = world.commit("bob", 0, 42);
    world.at(0, Phase::Reveal);
    world.reveal("bob", &request);

    world.at(0, Phase::Propose);
    let value = Amount::from_u64(42);
    let proposal = BlockProposal {
        epoch: 0,
        job_ids: vec![world.job],
        medians: vec![value.clone()],
        lower_cutoffs: vec![value.clone()],
        higher_cutoffs: vec![value],
        iteration: 0,
        biggest_staker_id: bob,
    };
    let err = world.oracle.propose(address("bob"), &proposal).unwrap_err();
    assert!(matches!(
        err,
        OracleError::Consensus(ConsensusError::NotBiggestStaker { biggest_staker_id }) if biggest_staker_id == bob
    ));
    assert_eq!(world.oracle.get_num_proposed_blocks(0), 0);
}

/// Two revealed proposers; the one ranking first submits a tampered median
fn epoch_with_tampered_leader(world: &mut World) -> (StakerId, StakerId) {
    let names = ["alice", "bob", "carol"];
    let ids: Vec<StakerId> = names
        .iter()
        .map(|name| world.fund_and_stake(name, 0, 1_000))
        .collect();

    let requests: Vec<RevealRequest> = names
        .iter()
        .zip([40u64, 42, 44])
        .map(|(name, value)| world.commit(name, 0, value))
        .collect();
    world.at(0, Phase::Reveal);
    for (name, request) in names.iter().zip(&requests) {
        world.reveal(name, request);
    }

    world.at(0, Phase::Propose);
    let mut ranked: Vec<(u64, usize)> = (0..2)
        .map(|i| (client::election_iteration(&world.oracle, ids[i], 0).unwrap(), i))
        .collect();
    ranked.sort();
    let (leader, runner_up) = (ranked[0].1, ranked[1].1);

    let mut tampered: BlockProposal = client::honest_proposal(&world.oracle, ids[leader], 0).unwrap();
    tampered.medians[0] = Amount::from_u64(44);
    world.oracle.propose(address(names[leader]), &tampered).unwrap();

    let honest = client::honest_proposal(&world.oracle, ids[runner_up], 0).unwrap();
    assert_eq!(honest.medians[0], Amount::from_u64(42));
    world.oracle.propose(address(names[runner_up]), &honest).unwrap();

    (ids[leader], ids[runner_up])
}

#[test]
fn test_confirm_twice_fails_and_dispute_promotes_next_block() {
    let mut world = World::new();
    let (leader, runner_up) = epoch_with_tampered_leader(&mut world);
    let carol = address("carol");

    world.at(0, Phase::Dispute);
    let sorted = client::sorted_values(&world.oracle, 0, world.job);
    assert_eq!(sorted.len(), 3);
    world.oracle.give_sorted(carol, 0, world.job, &sorted).unwrap();

    world.at(0, Phase::Confirm);
    let first = world.oracle.confirm_block(0).unwrap().unwrap();
    assert_eq!(world.oracle.get_block(0, first).unwrap().proposer_id, leader);
    assert_eq!(world.oracle.get_result(world.job), Some(&Amount::from_u64(44)));

    let err = world.oracle.confirm_block(0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Consensus);

    let carol_before = world.oracle.balance_of(&carol);
    let resolution = world.oracle.reset_dispute(carol, 0).unwrap();
    assert_eq!(resolution.outcome, DisputeOutcome::Invalidated);
    assert!(resolution.was_confirmed);
    assert_eq!(resolution.proposer_id, leader);
    assert!(!world.oracle.get_block(0, first).unwrap().valid);
    assert!(world.oracle.get_staker(leader).unwrap().stake.is_zero());
    assert!(world.oracle.balance_of(&carol) > carol_before);
    let record = world.oracle.ledger().slashes_of(leader).next().unwrap();
    assert_eq!(record.reason, SlashReason::InvalidBlock);

    let second = world.oracle.confirm_block(0).unwrap().unwrap();
    assert_ne!(second, first);
    assert_eq!(world.oracle.get_block(0, second).unwrap().proposer_id, runner_up);
    assert_eq!(world.oracle.get_result(world.job), Some(&Amount::from_u64(42)));
    assert_eq!(world.oracle.get_num_proposed_blocks(0), 2);
}

#[test]
fn test_dispute_of_correct_block_is_upheld() {
    let mut world = World::new();
    let (_, runner_up) = epoch_with_tampered_leader(&mut world);
    let carol = address("carol");

    world.at(0, Phase::Dispute);
    let sorted = client::sorted_values(&world.oracle, 0, world.job);
    world.oracle.give_sorted(carol, 0, world.job, &sorted).unwrap();
    world.oracle.reset_dispute(carol, 0).unwrap();

    // The honest block now leads and survives a second replay
    world.oracle.give_sorted(carol, 0, world.job, &sorted).unwrap();
    let resolution = world.oracle.reset_dispute(carol, 0).unwrap();
    assert_eq!(resolution.outcome, DisputeOutcome::Upheld);
    assert_eq!(resolution.proposer_id, runner_up);
    assert!(world.oracle.get_staker(runner_up).unwrap().stake > Amount::zero());
}

#[test]
fn test_unsorted_dispute_values_rejected() {
    let mut world = World::new();
    epoch_with_tampered_leader(&mut world);
    world.at(0, Phase::Dispute);

    let descending = vec![Amount::from_u64(44), Amount::from_u64(40)];
    let err = world
        .oracle
        .give_sorted(address("carol"), 0, world.job, &descending)
        .unwrap_err();
    assert!(matches!(err, OracleError::Consensus(_)));

    world.oracle.abandon_dispute(address("carol"), 0).unwrap_err();
}

#[test]
fn test_accurate_revealers_rewarded_at_next_commit() {
    let mut world = World::new();
    let ids: Vec<StakerId> = ["alice", "bob"]
        .iter()
        .map(|name| world.fund_and_stake(name, 0, 1_000))
        .collect();
    let requests: Vec<RevealRequest> = ["alice", "bob"]
        .iter()
        .map(|name| world.commit(name, 0, 42))
        .collect();

    world.at(0, Phase::Reveal);
    world.reveal("alice", &requests[0]);
    world.reveal("bob", &requests[1]);

    world.at(0, Phase::Propose);
    let mut proposed = 0;
    for (name, id) in ["alice", "bob"].iter().zip(&ids) {
        if let Some(proposal) = client::honest_proposal(&world.oracle, *id, 0) {
            world.oracle.propose(address(name), &proposal).unwrap();
            proposed += 1;
        }
    }
    assert!(proposed > 0);

    world.at(0, Phase::Confirm);
    world.oracle.confirm_block(0).unwrap().unwrap();
    // The job credit moved from the pool into epoch 0's bucket
    assert!(world.oracle.ledger().reward_pool().is_zero());

    world.at(1, Phase::Commit);
    let before = world.oracle.get_staker(ids[0]).unwrap().stake.clone();
    world.commit("alice", 1, 42);
    let after = world.oracle.get_staker(ids[0]).unwrap().stake.clone();

    // Equal weights split the 500 credit evenly
    assert_eq!(after, before.checked_add(&Amount::from_u64(250)).unwrap());
    assert_eq!(
        world
            .oracle
            .events()
            .named("StakeChange")
            .filter(|e| matches!(
                &e.event,
                oracle_core::OracleEvent::StakeChange { reason: oracle_core::StakeChangeReason::Reward, .. }
            ))
            .count(),
        1
    );
}

#[test]
fn test_leaked_secret_is_slashed_with_bounty() {
    let mut world = World::new();
    let a = world.fund_and_stake("alice", 0, 1_000);
    world.fund_and_stake("bob", 0, 1_000);
    let request = world.commit("alice", 0, 42);

    let outcome = world
        .oracle
        .reveal(address("bob"), address("alice"), &request)
        .unwrap();
    assert!(matches!(outcome, RevealOutcome::Snitched(_)));
    assert!(world.oracle.get_staker(a).unwrap().stake.is_zero());

    world.at(0, Phase::Reveal);
    let err = world
        .oracle
        .reveal(address("alice"), address("alice"), &request)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_concurrent_clients_serialize_through_shared_oracle() {
    let mut world = World::new();
    let names: Vec<String> = (0..6).map(|i| format!("staker-{i}")).collect();
    for name in &names {
        world.fund_and_stake(name, 0, 1_000);
    }
    let job = world.job;
    let shared = SharedOracle::new(world.oracle);

    let mut handles = Vec::new();
    for (i, name) in names.iter().enumerate() {
        let shared = shared.clone();
        let who = address(name);
        handles.push(tokio::spawn(async move {
            let secret = Hash::new([i as u8 + 1; 32]);
            let batch = RevealBatch::new(vec![JobVote::new(job, 100 + i as u64)]).unwrap();
            shared
                .commit(who, 0, batch.commitment(&secret, &who))
                .await
                .map(|_| (who, batch.request(0, secret).unwrap()))
        }));
    }
    let mut requests = Vec::new();
    for handle in handles {
        requests.push(handle.await.unwrap().unwrap());
    }

    shared.advance_to_phase(0, Phase::Reveal).await.unwrap();
    let reveals = requests.into_iter().map(|(who, request)| {
        let shared = shared.clone();
        tokio::spawn(async move { shared.reveal(who, who, request).await })
    });
    for result in futures::future::join_all(reveals).await {
        assert!(matches!(result.unwrap(), Ok(RevealOutcome::Revealed { .. })));
    }

    let total = shared.read(|o| o.total_stake_revealed(0, job)).await;
    assert_eq!(total, Amount::from_u64(6_000));
    let committed = shared.read(|o| o.events().named("Committed").count()).await;
    assert_eq!(committed, 6);
    assert_eq!(shared.moment().await.phase, Phase::Reveal);
}

#[test]
fn test_invalidating_the_only_confirmed_block_restores_results() {
    let mut world = World::new();
    let once = world
        .oracle
        .create_job(
            address("creator"),
            JobSpec {
                url: "https://api.example.com/settlement".into(),
                selector: "$.price".into(),
                name: "settlement".into(),
                repeat: false,
            },
            Amount::from_u64(500),
        )
        .unwrap();
    let job = world.job;
    let ids: Vec<StakerId> = ["alice", "bob"]
        .iter()
        .map(|name| world.fund_and_stake(name, 0, 1_000))
        .collect();
    let requests: Vec<RevealRequest> = [("alice", 40u64), ("bob", 42)]
        .iter()
        .map(|(name, value)| {
            world.commit_votes(name, 0, vec![JobVote::new(job, *value), JobVote::new(once, *value)])
        })
        .collect();
    world.at(0, Phase::Reveal);
    world.reveal("alice", &requests[0]);
    world.reveal("bob", &requests[1]);

    // One proposer, splitting the difference on every job
    world.at(0, Phase::Propose);
    let (proposer, proposer_name, disputer) =
        if client::election_iteration(&world.oracle, ids[0], 0) <= client::election_iteration(&world.oracle, ids[1], 0) {
            (ids[0], "alice", address("bob"))
        } else {
            (ids[1], "bob", address("alice"))
        };
    let mut tampered = client::honest_proposal(&world.oracle, proposer, 0).unwrap();
    for median in tampered.medians.iter_mut() {
        *median = Amount::from_u64(41);
    }
    world.oracle.propose(address(proposer_name), &tampered).unwrap();

    world.at(0, Phase::Dispute);
    let sorted = client::sorted_values(&world.oracle, 0, job);
    world.oracle.give_sorted(disputer, 0, job, &sorted).unwrap();

    world.at(0, Phase::Confirm);
    let supply_before = world.oracle.balances().total_supply().clone();
    world.oracle.confirm_block(0).unwrap().unwrap();
    assert_eq!(world.oracle.get_result(once), Some(&Amount::from_u64(41)));
    assert!(world.oracle.get_job(once).unwrap().fulfilled);
    assert_eq!(world.oracle.get_staker(proposer).unwrap().stake, Amount::from_u64(1_100));
    assert!(world.oracle.applied_block(0).is_some());

    let resolution = world.oracle.reset_dispute(disputer, 0).unwrap();
    assert_eq!(resolution.outcome, DisputeOutcome::Invalidated);
    assert!(resolution.was_confirmed);

    // Nothing else to confirm, and nothing of the bad block survives
    assert_eq!(world.oracle.confirm_block(0).unwrap(), None);
    assert!(world.oracle.confirmed_block(0).is_none());
    assert_eq!(world.oracle.get_result(job), None);
    assert_eq!(world.oracle.get_result(once), None);
    let settlement = world.oracle.get_job(once).unwrap();
    assert!(!settlement.fulfilled);
    assert_eq!(settlement.epoch_fulfilled, None);
    assert_eq!(world.oracle.events().named("ResultReverted").count(), 2);
    assert!(world.oracle.applied_block(0).is_none());

    let revoked = world.oracle.events().entries().iter().any(|entry| {
        matches!(
            entry.event,
            OracleEvent::StakeChange { staker_id, reason: StakeChangeReason::BlockRewardRevoked, .. } if staker_id == proposer
        )
    });
    assert!(revoked);
    assert!(world.oracle.get_staker(proposer).unwrap().stake.is_zero());
    assert!(world.oracle.ledger().reward_bucket(0).is_none());
    assert_eq!(world.oracle.ledger().reward_pool(), &Amount::from_u64(1_000));
    assert!(world.oracle.balances().total_supply() < &supply_before);
}

#[test]
fn test_restake_after_full_withdraw_can_commit() {
    let mut world = World::new();
    let alice = address("alice");
    let id = world.fund_and_stake("alice", 0, 1_000);
    let request = world.commit("alice", 0, 42);
    world.at(0, Phase::Reveal);
    world.reveal("alice", &request);

    world.at(1, Phase::Commit);
    world.oracle.unstake(alice, 1).unwrap();
    world.at(3, Phase::Commit);
    assert_eq!(world.oracle.withdraw(alice, 3).unwrap(), Amount::from_u64(1_000));

    // Twenty idle epochs would decay a carried-over baseline to nothing
    world.at(23, Phase::Commit);
    assert_eq!(world.oracle.stake(alice, 23, Amount::from_u64(1_000)).unwrap(), id);
    world.commit("alice", 23, 42);

    let staker = world.oracle.get_staker(id).unwrap();
    assert_eq!(staker.stake, Amount::from_u64(1_000));
    assert_eq!(staker.epoch_staked, 23);
    assert_eq!(staker.epoch_last_committed, Some(23));
}
