//! Deduplication and activity analysis of a bonded snapshot, and the payee filter that
//! selects migration targets.
use std::path::Path;

use log::{info, warn};
use num_bigint::BigUint;

use crate::artifact::{self, ArtifactKind, WriteMode};
use crate::decode;
use crate::error::*;
use crate::ledger::{RawEntry, StorageItem};
use crate::model::{Address, NetworkSnapshot, PayeeKind, StashControllerPair};
use crate::network::Network;
use crate::orchestrator::RunContext;

/// Statistics derived from one network's snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct Analysis {
    /// Number of pairs in the snapshot.
    pub total: usize,
    /// Pairs whose stash and controller differ, in snapshot order.
    pub unique_pairs: Vec<StashControllerPair>,
    /// `unique_pairs.len()`
    pub unique_count: usize,
    /// `unique_count / total * 100`, `NaN` for an empty snapshot.
    pub percent_unique: f64,
    /// Unique pairs whose controller has a non-zero active stake.
    pub active_count: usize,
    /// `active_count / unique_count * 100`, `NaN` without unique pairs.
    pub percent_active: f64,
}

/// Keeps the pairs with `stash != controller`, preserving order.
pub fn unique_pairs(pairs: &[StashControllerPair]) -> Vec<StashControllerPair> {
    pairs.iter().filter(|p| p.is_unique()).cloned().collect()
}

/// `part / whole * 100`; an empty `whole` yields `NaN` rather than a misleading zero.
pub fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return f64::NAN;
    }
    part as f64 / whole as f64 * 100.0
}

/// Counts the controllers with a non-zero `active` balance in `Staking::Ledger`.
///
/// All controllers are looked up in a single round trip. Missing or undecodable ledgers count
/// as inactive.
pub async fn count_active(ctx: &RunContext<'_>, controllers: &[Address]) -> Result<usize> {
    if controllers.is_empty() {
        return Ok(0);
    }

    let keys = controllers
        .iter()
        .map(Address::account_id)
        .collect::<Result<Vec<_>>>()?;
    let ledgers = ctx
        .ledger
        .point_lookup_many(StorageItem::Ledger, &keys)
        .await?;

    let zero = BigUint::default();
    let active = controllers
        .iter()
        .zip(ledgers)
        .filter(|(controller, ledger)| match ledger {
            None => false,
            Some(value) => match decode::active_stake(value) {
                Ok(active) => active != zero,
                Err(e) => {
                    warn!("⚠️ Undecodable ledger for controller {controller}: {e}");
                    false
                }
            },
        })
        .count();
    Ok(active)
}

/// Analyzes `snapshot` and persists the controllers of its unique pairs to the `unique`
/// artifact in `cache_dir`.
///
/// The unique artifact is derived data and is rewritten on every run.
pub async fn analyze(
    ctx: &RunContext<'_>,
    snapshot: &NetworkSnapshot,
    cache_dir: &Path,
) -> Result<Analysis> {
    let total = snapshot.pairs.len();
    let unique_pairs = unique_pairs(&snapshot.pairs);
    let unique_count = unique_pairs.len();

    let controllers: Vec<Address> = unique_pairs.iter().map(|p| p.controller.clone()).collect();
    let active_count = count_active(ctx, &controllers).await?;

    let path = ctx.network.artifact_path(cache_dir, ArtifactKind::Unique);
    artifact::write(
        &path,
        ctx.network,
        ArtifactKind::Unique,
        &controllers,
        WriteMode::Overwrite,
    )
    .await?;

    info!(
        "Analyzed {}: {} pairs, {} unique, {} active",
        ctx.network, total, unique_count, active_count
    );
    Ok(Analysis {
        total,
        unique_pairs,
        unique_count,
        percent_unique: percent(unique_count, total),
        active_count,
        percent_active: percent(active_count, unique_count),
    })
}

/// Decodes raw `Staking::Payee` entries and keeps the stashes whose payee is `kind`.
///
/// Order is preserved; entries that fail to decode are dropped.
pub fn filter_payees_by_kind(network: Network, entries: &[RawEntry], kind: PayeeKind) -> Vec<Address> {
    entries
        .iter()
        .filter_map(|entry| match decode::payee_record(network, entry) {
            Ok(record) => (record.payee_kind == kind).then_some(record.stash),
            Err(e) => {
                warn!("⚠️ Dropping payee entry 0x{}: {e}", hex::encode(&entry.key));
                None
            }
        })
        .collect()
}
