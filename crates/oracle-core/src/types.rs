// oracle-core/src/types.rs

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

/// Protocol epoch number
pub type Epoch = u64;

/// Chain height of the collaborating ledger
pub type BlockNumber = u64;

/// Timestamp in Unix epoch seconds
pub type Timestamp = u64;

/// Staker identity, assigned once at first stake; 0 is never assigned
pub type StakerId = u64;

/// Job or collection id; both share one counter
pub type AssetId = u64;

/// Position of a proposed block within its epoch
pub type BlockIndex = usize;

/// Basis points denominator
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Unsigned token amount or reported value, bounded to 256 bits
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(BigUint);

impl Amount {
    pub const MAX_BITS: u64 = 256;

    pub fn new(value: BigUint) -> Self {
        Self(value)
    }

    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    pub fn from_u64(value: u64) -> Self {
        Self(BigUint::from(value))
    }

    pub fn from_tokens(tokens: u64) -> Self {
        // 1 token = 10^18 base units
        Self(BigUint::from(tokens) * BigUint::from(10u64).pow(18))
    }

    pub fn inner(&self) -> &BigUint {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Lossy view for logging and statistics
    pub fn to_u64_saturating(&self) -> u64 {
        self.0.to_u64().unwrap_or(u64::MAX)
    }

    pub fn checked_add(&self, other: &Amount) -> Option<Amount> {
        let sum = &self.0 + &other.0;
        if sum.bits() > Self::MAX_BITS {
            None
        } else {
            Some(Amount(sum))
        }
    }

    pub fn checked_sub(&self, other: &Amount) -> Option<Amount> {
        if self.0 < other.0 {
            None
        } else {
            Some(Amount(&self.0 - &other.0))
        }
    }

    pub fn saturating_sub(&self, other: &Amount) -> Amount {
        self.checked_sub(other).unwrap_or_else(Amount::zero)
    }

    /// `self * numerator / denominator`, rounding down; `None` on a zero denominator
    pub fn mul_div(&self, numerator: &Amount, denominator: &Amount) -> Option<Amount> {
        if denominator.is_zero() {
            return None;
        }
        Some(Amount(&self.0 * &numerator.0 / &denominator.0))
    }

    /// `self * bps / 10_000`, rounding down
    pub fn apply_bps(&self, bps: u16) -> Amount {
        Amount(&self.0 * u64::from(bps) / BPS_DENOMINATOR)
    }

    /// Big-endian 32-byte encoding (uint256)
    pub fn to_be_bytes32(&self) -> [u8; 32] {
        let bytes = self.0.to_bytes_be();
        let mut out = [0u8; 32];
        let take = bytes.len().min(32);
        out[32 - take..].copy_from_slice(&bytes[bytes.len() - take..]);
        out
    }

    pub fn from_be_bytes(bytes: &[u8]) -> Amount {
        Amount(BigUint::from_bytes_be(bytes))
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Amount::from_u64(value)
    }
}

impl FromStr for Amount {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = BigUint::parse_bytes(s.trim().as_bytes(), 10)
            .ok_or_else(|| crate::CoreError::Overflow(format!("not a decimal amount: {s}")))?;
        if value.bits() > Self::MAX_BITS {
            return Err(crate::CoreError::Overflow(format!("{s} exceeds 256 bits")));
        }
        Ok(Amount(value))
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Decimal strings keep JSON and TOML output readable.
impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_str_radix(10))
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Amount::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// A staker's revealed value for one job and the stake backing it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub value: Amount,
    pub weight: Amount,
}

/// One leaf of a reveal batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobVote {
    pub job_id: AssetId,
    pub value: Amount,
}

impl JobVote {
    pub fn new(job_id: AssetId, value: impl Into<Amount>) -> Self {
        Self {
            job_id,
            value: value.into(),
        }
    }

    /// Merkle leaf: keccak256(job_id as uint256 ‖ value as uint256)
    pub fn leaf(&self) -> oracle_crypto::Hash {
        let mut id = [0u8; 32];
        id[24..].copy_from_slice(&self.job_id.to_be_bytes());
        oracle_crypto::keccak_concat(&[&id, &self.value.to_be_bytes32()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_arithmetic() {
        let a = Amount::from_u64(100);
        let b = Amount::from_u64(50);

        let sum = a.checked_add(&b).unwrap();
        assert_eq!(sum, Amount::from_u64(150));
        assert_eq!(sum.checked_sub(&b).unwrap(), Amount::from_u64(100));
    }

    #[test]
    fn test_amount_underflow() {
        let a = Amount::from_u64(50);
        let b = Amount::from_u64(100);

        assert!(a.checked_sub(&b).is_none());
        assert_eq!(a.saturating_sub(&b), Amount::zero());
    }

    #[test]
    fn test_amount_bounded_to_256_bits() {
        let max = Amount::new((BigUint::from(1u8) << 256u32) - 1u8);
        assert!(max.checked_add(&Amount::from_u64(1)).is_none());
        assert_eq!(max.to_be_bytes32(), [0xff; 32]);
    }

    #[test]
    fn test_mul_div_and_bps() {
        let pool = Amount::from_u64(1_000);
        let share = pool.mul_div(&Amount::from_u64(1), &Amount::from_u64(3)).unwrap();
        assert_eq!(share, Amount::from_u64(333));
        assert!(pool.mul_div(&Amount::from_u64(1), &Amount::zero()).is_none());
        assert_eq!(pool.apply_bps(2_500), Amount::from_u64(250));
    }

    #[test]
    fn test_amount_serde_as_decimal() {
        let amount = Amount::from_tokens(2);
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"2000000000000000000\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amount);
    }

    #[test]
    fn test_leaf_binds_job_id() {
        assert_ne!(JobVote::new(1, 42).leaf(), JobVote::new(2, 42).leaf());
    }
}
