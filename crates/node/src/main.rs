// node/src/main.rs
use clap::{Parser, Subcommand};
use node::{load_snapshot, save_snapshot, NodeConfig, Oracle, Simulation};
use oracle_core::Amount;
use oracle_crypto::Address;
use registry::JobSpec;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "oracle-node")]
#[command(about = "Stake-weighted commit-reveal oracle", version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "./oracle.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and a genesis snapshot
    Init {
        /// Overwrite an existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Run stakers through whole epochs against a fresh oracle
    Simulate {
        /// Override the number of epochs
        #[arg(short, long)]
        epochs: Option<u64>,

        /// Override the number of stakers
        #[arg(short, long)]
        stakers: Option<usize>,

        /// Override the RNG seed
        #[arg(long)]
        seed: Option<u64>,

        /// Keep the final state as the node snapshot
        #[arg(long)]
        save: bool,
    },

    /// Show the current epoch, stakers and recent blocks
    Status,

    /// Print the event log as JSON lines
    Events {
        /// First sequence number to print
        #[arg(short, long, default_value = "0")]
        since: u64,
    },

    /// Credit liquid tokens to an address
    Mint {
        /// 0x-prefixed address, or any name to derive one from
        #[arg(value_parser = parse_address)]
        address: Address,
        amount: Amount,
    },

    /// Lock tokens as stake in the current epoch
    Stake {
        #[arg(value_parser = parse_address)]
        address: Address,
        amount: Amount,
    },

    /// Request the stake back after the cool-down
    Unstake {
        #[arg(value_parser = parse_address)]
        address: Address,
    },

    /// Withdraw an unstaked stake once the cool-down elapsed
    Withdraw {
        #[arg(value_parser = parse_address)]
        address: Address,
    },

    /// Register a job for the stakers to report on
    CreateJob {
        #[arg(value_parser = parse_address)]
        creator: Address,

        #[arg(long)]
        url: String,

        #[arg(long, default_value = "")]
        selector: String,

        #[arg(long)]
        name: String,

        /// Report every epoch instead of once
        #[arg(long)]
        repeat: bool,

        #[arg(long)]
        credit: Amount,
    },

    /// Move the ledger clock forward
    Advance {
        /// Heights to advance
        #[arg(short, long, default_value = "1")]
        blocks: u64,
    },
}

fn parse_address(s: &str) -> Result<Address, String> {
    if s.starts_with("0x") {
        Address::from_hex(s).map_err(|e| e.to_string())
    } else {
        Ok(Address::derive(s.as_bytes()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "node={level},oracle_node={level},staking={level},voting={level},consensus={level},registry={level},oracle_core={level}",
                    level = log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Init { force } => init_node(&cli.config, force)?,
        Commands::Simulate {
            epochs,
            stakers,
            seed,
            save,
        } => simulate(&cli.config, epochs, stakers, seed, save).await?,
        Commands::Status => show_status(&cli.config)?,
        Commands::Events { since } => {
            let config = load_config(&cli.config)?;
            let oracle = load_snapshot(&config.state_path)?;
            let stdout = std::io::stdout();
            let written = node::export_events(&oracle, since, &mut stdout.lock())?;
            tracing::debug!("Exported {} events", written);
        }
        Commands::Mint { address, amount } => {
            with_oracle(&cli.config, |oracle| {
                oracle.mint(address, &amount)?;
                Ok(())
            })?;
        }
        Commands::Stake { address, amount } => {
            with_oracle(&cli.config, |oracle| {
                let epoch = oracle.now().epoch;
                let staker_id = oracle.stake(address, epoch, amount)?;
                tracing::info!("Staker {} now holds {}", staker_id, stake_of(oracle, staker_id));
                Ok(())
            })?;
        }
        Commands::Unstake { address } => {
            with_oracle(&cli.config, |oracle| {
                let epoch = oracle.now().epoch;
                oracle.unstake(address, epoch)?;
                Ok(())
            })?;
        }
        Commands::Withdraw { address } => {
            with_oracle(&cli.config, |oracle| {
                let epoch = oracle.now().epoch;
                let amount = oracle.withdraw(address, epoch)?;
                tracing::info!("Withdrew {} to {}", amount, address);
                Ok(())
            })?;
        }
        Commands::CreateJob {
            creator,
            url,
            selector,
            name,
            repeat,
            credit,
        } => {
            with_oracle(&cli.config, |oracle| {
                let spec = JobSpec {
                    url,
                    selector,
                    name,
                    repeat,
                };
                let id = oracle.create_job(creator, spec, credit)?;
                tracing::info!("Created job {}", id);
                Ok(())
            })?;
        }
        Commands::Advance { blocks } => {
            with_oracle(&cli.config, |oracle| {
                let moment = oracle.advance_blocks(blocks)?;
                tracing::info!(
                    "Height {} (epoch {}, {:?})",
                    moment.height,
                    moment.epoch,
                    moment.phase
                );
                Ok(())
            })?;
        }
    }

    Ok(())
}

fn load_config(path: &str) -> anyhow::Result<NodeConfig> {
    if Path::new(path).exists() {
        NodeConfig::from_file(path)
    } else {
        tracing::warn!("No configuration at {}, using defaults", path);
        Ok(NodeConfig::default())
    }
}

/// Load the snapshot, apply one transaction and save it back
fn with_oracle(
    config_path: &str,
    apply: impl FnOnce(&mut Oracle) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let mut oracle = load_snapshot(&config.state_path)?;
    apply(&mut oracle)?;
    save_snapshot(&oracle, &config.state_path)
}

fn stake_of(oracle: &Oracle, staker_id: u64) -> Amount {
    oracle
        .get_staker(staker_id)
        .map(|s| s.stake.clone())
        .unwrap_or_default()
}

fn init_node(config_path: &str, force: bool) -> anyhow::Result<()> {
    if Path::new(config_path).exists() && !force {
        anyhow::bail!("{} already exists, pass --force to overwrite", config_path);
    }

    tracing::info!("Initializing oracle node at {}", config_path);
    let config = NodeConfig::default();
    config.to_file(config_path)?;

    let genesis_timestamp = chrono::Utc::now().timestamp().max(0) as u64;
    let oracle = Oracle::new(config.protocol.clone(), genesis_timestamp)?
        .with_block_time(config.block_time_seconds);
    save_snapshot(&oracle, &config.state_path)?;

    tracing::info!("Oracle initialized successfully");
    tracing::info!("Edit {} to configure your node", config_path);
    Ok(())
}

async fn simulate(
    config_path: &str,
    epochs: Option<u64>,
    stakers: Option<usize>,
    seed: Option<u64>,
    save: bool,
) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(epochs) = epochs {
        config.simulation.epochs = epochs;
    }
    if let Some(stakers) = stakers {
        config.simulation.stakers = stakers;
    }
    if let Some(seed) = seed {
        config.simulation.seed = seed;
    }

    let genesis_timestamp = chrono::Utc::now().timestamp().max(0) as u64;
    let mut simulation = Simulation::new(&config, genesis_timestamp)?;
    let report = simulation.run().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if save {
        let oracle = simulation.oracle().snapshot().await;
        save_snapshot(&oracle, &config.state_path)?;
    }
    Ok(())
}

fn show_status(config_path: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let oracle = load_snapshot(&config.state_path)?;
    let now = oracle.now();
    let ledger = oracle.ledger();

    tracing::info!("Oracle Status:");
    tracing::info!(
        "  height {} | epoch {} | phase {:?} | timestamp {}",
        now.height,
        now.epoch,
        now.phase,
        now.timestamp
    );
    tracing::info!(
        "  total locked {} | reward pool {} | slashed {} | burned {}",
        ledger.total_locked(),
        ledger.reward_pool(),
        ledger.total_slashed(),
        oracle.balances().total_burned()
    );

    for staker in ledger.stakers() {
        tracing::info!(
            "  staker {} {} stake {} last revealed {:?}",
            staker.id,
            staker.address,
            staker.stake,
            staker.epoch_last_revealed
        );
    }

    for epoch in now.epoch.saturating_sub(3)..=now.epoch {
        if let Some(block) = oracle.confirmed_block(epoch) {
            tracing::info!(
                "  epoch {}: block {} by staker {} with {} results",
                epoch,
                block.index,
                block.proposer_id,
                block.job_ids.len()
            );
        }
    }

    for job in oracle.registry().jobs() {
        tracing::info!(
            "  job {} '{}' result {}",
            job.id,
            job.name,
            job.result
                .as_ref()
                .map_or_else(|| "-".to_string(), Amount::to_string)
        );
    }
    Ok(())
}
