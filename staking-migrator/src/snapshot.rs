//! Cached acquisition of the `Staking::Bonded` pair snapshot.
use std::path::Path;

use log::{info, warn};

use crate::artifact::{self, ArtifactKind, WriteMode};
use crate::decode;
use crate::error::*;
use crate::ledger::StorageItem;
use crate::model::{NetworkSnapshot, StashControllerPair};
use crate::orchestrator::RunContext;

/// Returns the bonded snapshot of `ctx.network`.
///
/// A snapshot already persisted at `cache_path` is returned as is, without any freshness
/// check. Otherwise every `Staking::Bonded` entry is enumerated, decoded into a pair, and the
/// result is persisted before being returned. Entries that fail to decode are dropped.
///
/// An unreadable artifact is treated like a missing one, while an artifact with the wrong
/// schema version, kind or network is an error.
pub async fn get_snapshot(ctx: &RunContext<'_>, cache_path: &Path) -> Result<NetworkSnapshot> {
    match artifact::read::<Vec<StashControllerPair>>(cache_path, ctx.network, ArtifactKind::Bonded)
        .await
    {
        Ok(Some(pairs)) => {
            info!(
                "Loaded {} bonded pairs for {} from '{}'",
                pairs.len(),
                ctx.network,
                cache_path.display()
            );
            return Ok(NetworkSnapshot {
                network: ctx.network,
                pairs,
            });
        }
        Ok(None) => info!(
            "No cached snapshot at '{}', fetching bonded pairs for {}",
            cache_path.display(),
            ctx.network
        ),
        Err(e @ Error::ArtifactRead { .. }) => {
            warn!("⚠️ {e}, fetching bonded pairs for {}", ctx.network)
        }
        Err(e) => return Err(e),
    }

    let entries = ctx.ledger.enumerate_entries(StorageItem::Bonded).await?;
    let total = entries.len();
    let pairs: Vec<StashControllerPair> = entries
        .iter()
        .filter_map(|entry| match decode::bonded_pair(ctx.network, entry) {
            Ok(pair) => Some(pair),
            Err(e) => {
                warn!(
                    "⚠️ Dropping bonded entry 0x{}: {e}",
                    hex::encode(&entry.key)
                );
                None
            }
        })
        .collect();
    info!(
        "Fetched {} bonded pairs for {} ({} dropped)",
        pairs.len(),
        ctx.network,
        total - pairs.len()
    );

    artifact::write(
        cache_path,
        ctx.network,
        ArtifactKind::Bonded,
        &pairs,
        WriteMode::CreateNew,
    )
    .await?;

    Ok(NetworkSnapshot {
        network: ctx.network,
        pairs,
    })
}
