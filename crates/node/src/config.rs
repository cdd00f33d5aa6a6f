// node/src/config.rs
use oracle_core::{Amount, ProtocolConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Where the oracle state snapshot lives
    pub state_path: String,
    /// Seconds the ledger clock advances per height
    pub block_time_seconds: u64,
    pub protocol: ProtocolConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub stakers: usize,
    pub epochs: u64,
    pub jobs: usize,
    /// Tokens minted to every simulated staker at genesis
    pub initial_balance: Amount,
    /// Stakes are drawn uniformly from this range
    pub min_stake: u64,
    pub max_stake: u64,
    /// Credit attached to each simulated job
    pub job_credit: Amount,
    /// Percent of stakers that report outliers and tamper with proposals
    pub dishonest_percent: u8,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            stakers: 8,
            epochs: 5,
            jobs: 3,
            initial_balance: Amount::from_u64(100_000),
            min_stake: 100,
            max_stake: 10_000,
            job_credit: Amount::from_u64(1_000),
            dishonest_percent: 25,
            seed: 42,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            state_path: "./data/oracle.state".into(),
            block_time_seconds: 3,
            protocol: ProtocolConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&contents)?;
        config.protocol.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oracle.toml");
        let path = path.to_str().unwrap();

        let mut config = NodeConfig::default();
        config.simulation.stakers = 3;
        config.protocol.epoch_length = 50;
        config.to_file(path).unwrap();

        let loaded = NodeConfig::from_file(path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_rejects_invalid_protocol() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oracle.toml");
        let path = path.to_str().unwrap();

        let mut config = NodeConfig::default();
        config.protocol.epoch_length = 7;
        config.to_file(path).unwrap();

        assert!(NodeConfig::from_file(path).is_err());
    }
}
