// oracle-core/src/aggregation.rs

use crate::{Amount, BPS_DENOMINATOR};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a set of weighted values collapses into one result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    /// Smallest value at which cumulative weight reaches half the total
    Median,
    /// Weight-averaged value, rounded down
    Mean,
    /// Value with the greatest weight; ties go to the smaller value
    Mode,
}

impl std::str::FromStr for AggregationMethod {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "median" => Ok(AggregationMethod::Median),
            "mean" => Ok(AggregationMethod::Mean),
            "mode" => Ok(AggregationMethod::Mode),
            other => Err(crate::CoreError::InvalidConfiguration(format!(
                "unknown aggregation method: {other}"
            ))),
        }
    }
}

/// `cumulative / total >= bps / 10_000`
pub fn reaches_bps(cumulative: &Amount, total: &Amount, bps: u16) -> bool {
    cumulative.inner() * BPS_DENOMINATOR >= total.inner() * u64::from(bps)
}

/// Smallest value whose cumulative weight reaches `bps` of the total
pub fn weighted_percentile(weights: &BTreeMap<Amount, Amount>, bps: u16) -> Option<Amount> {
    let total = total_weight(weights)?;
    let mut cumulative = Amount::zero();
    for (value, weight) in weights {
        cumulative = cumulative.checked_add(weight)?;
        if reaches_bps(&cumulative, &total, bps) {
            return Some(value.clone());
        }
    }
    None
}

/// Collapse `value -> weight` into a single result; `None` when nothing carries weight
pub fn aggregate(method: AggregationMethod, weights: &BTreeMap<Amount, Amount>) -> Option<Amount> {
    match method {
        AggregationMethod::Median => weighted_percentile(weights, 5_000),
        AggregationMethod::Mean => {
            let total = total_weight(weights)?;
            let sum = weights.iter().fold(num_bigint::BigUint::from(0u8), |acc, (v, w)| {
                acc + v.inner() * w.inner()
            });
            Some(Amount::new(sum / total.inner()))
        }
        AggregationMethod::Mode => {
            let mut best: Option<(&Amount, &Amount)> = None;
            for (value, weight) in weights {
                if weight.is_zero() {
                    continue;
                }
                match best {
                    Some((_, w)) if weight <= w => {}
                    _ => best = Some((value, weight)),
                }
            }
            best.map(|(value, _)| value.clone())
        }
    }
}

fn total_weight(weights: &BTreeMap<Amount, Amount>) -> Option<Amount> {
    let total = weights
        .values()
        .try_fold(Amount::zero(), |acc, w| acc.checked_add(w))?;
    if total.is_zero() {
        None
    } else {
        Some(total)
    }
}
