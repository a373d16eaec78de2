//! Wires the pipeline stages together per network and reports their results.
use std::fmt;
use std::path::{Path, PathBuf};

use log::{error, info};

use crate::analyzer::{self, Analysis};
use crate::artifact::{self, ArtifactKind, WriteMode};
use crate::error::*;
use crate::ledger::{LedgerClient, StorageItem};
use crate::migration::{BatchOutcome, BatchStatus, MigrationEngine, MigrationOptions};
use crate::model::{Address, PayeeKind};
use crate::network::Network;
use crate::signer::Signer;
use crate::snapshot;
use crate::substrate::SubxtLedgerClient;

/// The state one network iteration runs against.
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
    /// Network being processed.
    pub network: Network,
    /// Client connected to that network.
    pub ledger: &'a dyn LedgerClient,
}

impl<'a> RunContext<'a> {
    /// Bundles a network with its client.
    pub fn new(network: Network, ledger: &'a dyn LedgerClient) -> Self {
        Self { network, ledger }
    }
}

/// Deduplication and activity statistics of one network.
#[derive(Clone, Debug, PartialEq)]
pub struct NetworkReport {
    /// Network the statistics belong to.
    pub network: Network,
    /// Bonded pairs in the snapshot.
    pub total: usize,
    /// Pairs with a distinct controller.
    pub unique: usize,
    /// Share of unique pairs, in percent.
    pub percent_unique: f64,
    /// Unique pairs whose controller is actively staking.
    pub active: usize,
    /// Share of active unique pairs, in percent.
    pub percent_active: f64,
}

impl NetworkReport {
    /// Summarizes an analysis of `network`.
    pub fn new(network: Network, analysis: &Analysis) -> Self {
        Self {
            network,
            total: analysis.total,
            unique: analysis.unique_count,
            percent_unique: analysis.percent_unique,
            active: analysis.active_count,
            percent_active: analysis.percent_active,
        }
    }
}

impl fmt::Display for NetworkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "---------")?;
        writeln!(f, "{} stats:", self.network)?;
        writeln!(f, "Total records: {}", self.total)?;
        writeln!(f, "Unique pairs: {}", self.unique)?;
        writeln!(f, "Percentage still unique: {:.2} %", self.percent_unique)?;
        writeln!(f, "Unique pairs that are active: {}", self.active)?;
        writeln!(
            f,
            "Percentage of unique pairs that are active: {:.2} %",
            self.percent_active
        )?;
        write!(f, "---------")
    }
}

/// Snapshot plus analysis of `ctx.network`, with artifacts kept in `cache_dir`.
pub async fn network_stats(ctx: &RunContext<'_>, cache_dir: &Path) -> Result<NetworkReport> {
    let cache_path = ctx.network.artifact_path(cache_dir, ArtifactKind::Bonded);
    let snapshot = snapshot::get_snapshot(ctx, &cache_path).await?;
    let analysis = analyzer::analyze(ctx, &snapshot, cache_dir).await?;
    Ok(NetworkReport::new(ctx.network, &analysis))
}

/// Prints the statistics of every network in `networks`, one after another.
///
/// A connection failure aborts the run. Any other failure is logged and only skips its
/// network; the returned reports cover the networks that completed.
pub async fn run_stats(networks: &[Network], cache_dir: &Path) -> Result<Vec<NetworkReport>> {
    let mut reports = Vec::with_capacity(networks.len());
    for &network in networks {
        let client = SubxtLedgerClient::connect(network.endpoint()).await?;
        let ctx = RunContext::new(network, &client);

        match network_stats(&ctx, cache_dir).await {
            Ok(report) => {
                println!("{report}");
                reports.push(report);
            }
            Err(e) => error!("❌ Statistics for {} failed: {}", network, e),
        }
    }
    println!("Done");
    Ok(reports)
}

/// Totals of one migration run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigrationSummary {
    /// Network that was migrated.
    pub network: Network,
    /// Address of the signing account.
    pub signer: Address,
    /// Batches that reported `ExtrinsicSuccess`.
    pub succeeded: usize,
    /// Batches that failed for any reason.
    pub failed: usize,
    /// Stashes across all batches.
    pub stashes_attempted: usize,
    /// Nonce the next transaction of the signer would use.
    pub final_nonce: u64,
}

impl MigrationSummary {
    fn new(network: Network, signer: Address, outcomes: &[BatchOutcome], final_nonce: u64) -> Self {
        let succeeded = outcomes
            .iter()
            .filter(|o| o.status == BatchStatus::Succeeded)
            .count();
        Self {
            network,
            signer,
            succeeded,
            failed: outcomes.len() - succeeded,
            stashes_attempted: outcomes.iter().map(|o| o.size).sum(),
            final_nonce,
        }
    }
}

impl fmt::Display for MigrationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "---------")?;
        writeln!(f, "{} payee migration by {}:", self.network, self.signer)?;
        writeln!(f, "Stashes attempted: {}", self.stashes_attempted)?;
        writeln!(f, "Batches succeeded: {}", self.succeeded)?;
        writeln!(f, "Batches failed: {}", self.failed)?;
        writeln!(f, "Final nonce: {}", self.final_nonce)?;
        write!(f, "---------")
    }
}

/// Stashes of `ctx.network` whose reward destination is still `Controller`.
pub async fn migration_targets(ctx: &RunContext<'_>) -> Result<Vec<Address>> {
    info!("Getting payee entries for {}...", ctx.network);
    let entries = ctx.ledger.enumerate_entries(StorageItem::Payee).await?;
    Ok(analyzer::filter_payees_by_kind(
        ctx.network,
        &entries,
        PayeeKind::Controller,
    ))
}

/// Migrates every `Controller` payee of `ctx.network` with `signer`.
pub async fn migrate_payees(
    ctx: &RunContext<'_>,
    signer: Signer,
    options: MigrationOptions,
) -> Result<MigrationSummary> {
    let targets = migration_targets(ctx).await?;
    let signer_address = signer.address().clone();

    let mut engine = MigrationEngine::start(*ctx, signer, options).await;
    let outcomes = engine.migrate(&targets).await;

    Ok(MigrationSummary::new(
        ctx.network,
        signer_address,
        &outcomes,
        engine.signer_state().nonce(),
    ))
}

/// Connects to `network` (or to `endpoint`, when given) and runs the payee migration with the
/// key derived from `phrase`.
pub async fn run_migration(
    network: Network,
    endpoint: Option<&str>,
    phrase: &str,
    options: MigrationOptions,
) -> Result<MigrationSummary> {
    let signer = Signer::from_phrase(phrase, network)?;
    let client = SubxtLedgerClient::connect(endpoint.unwrap_or(network.endpoint())).await?;
    let ctx = RunContext::new(network, &client);

    let summary = migrate_payees(&ctx, signer, options).await?;
    println!("{summary}");
    Ok(summary)
}

/// Persists the runtime metadata summary of `ctx.network` into `cache_dir`.
pub async fn dump_metadata(ctx: &RunContext<'_>, cache_dir: &Path) -> Result<PathBuf> {
    let metadata = ctx.ledger.runtime_metadata().await?;
    let path = ctx.network.artifact_path(cache_dir, ArtifactKind::Metadata);
    artifact::write(
        &path,
        ctx.network,
        ArtifactKind::Metadata,
        &metadata,
        WriteMode::Overwrite,
    )
    .await?;
    Ok(path)
}

/// Dumps the runtime metadata of every network in `networks`.
pub async fn run_dump_metadata(networks: &[Network], cache_dir: &Path) -> Result<()> {
    for &network in networks {
        let client = SubxtLedgerClient::connect(network.endpoint()).await?;
        let path = dump_metadata(&RunContext::new(network, &client), cache_dir).await?;
        info!("✅ Metadata of {} written to '{}'", network, path.display());
    }
    Ok(())
}
