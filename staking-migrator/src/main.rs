//! Command line entry point: network statistics, payee migration and metadata dumps.
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{error, info};
use staking_migrator::migration::{MigrationOptions, UnresolvedNoncePolicy, DEFAULT_BATCH_SIZE};
use staking_migrator::network::Network;
use staking_migrator::orchestrator;

/// CLI entrypoint
#[derive(Parser, Debug)]
#[command(
    name = "staking-migrator",
    version,
    about = "Staking controller statistics and payee migration for the Polkadot relay chains"
)]
struct Cli {
    /// Directory holding the cached artifacts
    #[arg(long, env = "CACHE_DIR", default_value = ".", global = true)]
    cache_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Snapshot bonded pairs and print deduplication and activity statistics
    Stats {
        /// Networks to analyze, in order
        #[arg(long = "network", value_enum, default_values_t = Network::ALL)]
        networks: Vec<Network>,
    },

    /// Move every `Controller` payee to `Account(controller)` in signed batches
    MigratePayees {
        /// Secret phrase; the signing key is derived as `<phrase>//<network>`
        #[arg(long, env = "PHRASE", hide_env_values = true)]
        phrase: String,

        /// Network to migrate
        #[arg(long, value_enum, default_value_t = Network::Westend)]
        network: Network,

        /// Node RPC endpoint overriding the network's public endpoint
        #[arg(long)]
        rpc: Option<url::Url>,

        /// Stashes per batch transaction
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// Seconds to wait for a batch's terminal event; 0 waits forever
        #[arg(long, default_value_t = 300)]
        completion_timeout_secs: u64,

        /// Nonce handling when a batch never reports success or failure
        #[arg(long, value_enum, default_value_t = UnresolvedNoncePolicy::Consume)]
        unresolved_nonce: UnresolvedNoncePolicy,
    },

    /// Persist a summary of each network's runtime metadata
    DumpMetadata {
        /// Networks to dump, in order
        #[arg(long = "network", value_enum, default_values_t = Network::ALL)]
        networks: Vec<Network>,
    },
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Stats { networks } => {
            let reports = orchestrator::run_stats(&networks, &cli.cache_dir).await?;
            if reports.len() < networks.len() {
                anyhow::bail!(
                    "statistics failed for {} of {} networks",
                    networks.len() - reports.len(),
                    networks.len()
                );
            }
        }
        Commands::MigratePayees {
            phrase,
            network,
            rpc,
            batch_size,
            completion_timeout_secs,
            unresolved_nonce,
        } => {
            anyhow::ensure!(batch_size > 0, "--batch-size must be at least 1");
            let options = MigrationOptions {
                batch_size,
                completion_timeout: (completion_timeout_secs > 0)
                    .then(|| Duration::from_secs(completion_timeout_secs)),
                unresolved_nonce,
            };
            let endpoint = rpc.as_ref().map(url::Url::as_str);
            orchestrator::run_migration(network, endpoint, &phrase, options).await?;
        }
        Commands::DumpMetadata { networks } => {
            orchestrator::run_dump_metadata(&networks, &cli.cache_dir).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    info!("🚀 Starting staking-migrator...");
    if let Err(e) = run(cli).await {
        error!("❌ {e:#}");
        process::exit(1);
    }
}
