// consensus/src/selection.rs

use oracle_core::{Amount, Epoch, StakerId};
use oracle_crypto::{keccak_concat, Hash, HashAlgorithm, Hashable};

const STAKER_DOMAIN: &[u8] = b"staker";
const ACCEPT_DOMAIN: &[u8] = b"accept";
const ACCEPT_RANGE: u64 = 1 << 32;

/// Randomness for `epoch`, chained from the last confirmed block digest
/// (or the genesis seed before any confirmation)
pub fn epoch_seed(epoch: Epoch, previous: &Hash) -> Hash {
    keccak_concat(&[&epoch.to_be_bytes(), previous.as_bytes()])
}

/// Blake3 over seed ‖ domain ‖ words, truncated to 64 bits
fn prng(seed: &Hash, domain: &[u8], words: &[u64]) -> u64 {
    let mut bytes = Vec::with_capacity(seed.as_bytes().len() + domain.len() + words.len() * 8);
    bytes.extend_from_slice(seed.as_bytes());
    bytes.extend_from_slice(domain);
    for word in words {
        bytes.extend_from_slice(&word.to_be_bytes());
    }
    bytes.hash_with(HashAlgorithm::Blake3).leading_u64()
}

/// Staker id drawn uniformly for `iteration`
pub fn drawn_staker(seed: &Hash, iteration: u64, num_stakers: u64) -> Option<StakerId> {
    if num_stakers == 0 {
        return None;
    }
    Some(prng(seed, STAKER_DOMAIN, &[iteration]) % num_stakers + 1)
}

/// Two-stage lottery: `staker_id` must be the drawn id, then survives an
/// acceptance test passing with probability `stake / biggest_stake`
pub fn is_elected(
    seed: &Hash,
    iteration: u64,
    num_stakers: u64,
    staker_id: StakerId,
    stake: &Amount,
    biggest_stake: &Amount,
) -> bool {
    if stake.is_zero() || biggest_stake.is_zero() {
        return false;
    }
    if drawn_staker(seed, iteration, num_stakers) != Some(staker_id) {
        return false;
    }

    // rand * biggest <= stake * 2^32, without leaving integer arithmetic
    let rand = prng(seed, ACCEPT_DOMAIN, &[staker_id, iteration]) % ACCEPT_RANGE;
    stake
        .mul_div(&Amount::from_u64(ACCEPT_RANGE), biggest_stake)
        .map_or(false, |threshold| Amount::from_u64(rand) <= threshold)
}

/// First iteration below `max_iterations` at which `staker_id` is elected
pub fn find_iteration(
    seed: &Hash,
    num_stakers: u64,
    staker_id: StakerId,
    stake: &Amount,
    biggest_stake: &Amount,
    max_iterations: u64,
) -> Option<u64> {
    (0..max_iterations)
        .find(|&iteration| is_elected(seed, iteration, num_stakers, staker_id, stake, biggest_stake))
}

/// Closed-form election statistics
pub struct ElectionOdds;

impl ElectionOdds {
    /// Probability of passing a single iteration
    pub fn per_iteration(stake: &Amount, biggest_stake: &Amount, num_stakers: u64) -> f64 {
        if num_stakers == 0 || biggest_stake.is_zero() {
            return 0.0;
        }
        let ratio = stake
            .mul_div(&Amount::from_u64(1_000_000), biggest_stake)
            .map_or(0, |r| r.to_u64_saturating().min(1_000_000));
        ratio as f64 / 1_000_000.0 / num_stakers as f64
    }

    /// Mean number of iterations a staker scans before it is elected
    pub fn expected_iterations(stake: &Amount, biggest_stake: &Amount, num_stakers: u64) -> f64 {
        let p = Self::per_iteration(stake, biggest_stake, num_stakers);
        if p == 0.0 {
            f64::INFINITY
        } else {
            1.0 / p
        }
    }

    /// Gini coefficient of the stake distribution (0 = equal)
    pub fn gini_coefficient(stakes: &[Amount]) -> f64 {
        if stakes.is_empty() {
            return 0.0;
        }

        let mut sorted: Vec<f64> = stakes.iter().map(|s| s.to_u64_saturating() as f64).collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let n = sorted.len() as f64;
        let sum: f64 = sorted.iter().sum();
        if sum == 0.0 {
            return 0.0;
        }

        let mut numerator = 0.0;
        for (i, stake) in sorted.iter().enumerate() {
            numerator += (2.0 * (i as f64 + 1.0) - n - 1.0) * stake;
        }

        numerator / (n * sum)
    }
}
