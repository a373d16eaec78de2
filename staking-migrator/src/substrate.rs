//! [`LedgerClient`] backed by a `subxt` online client.
use std::collections::HashMap;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::{TryFutureExt, TryStreamExt};
use log::{debug, error, info, warn};
use snafu::ResultExt;
use sp_core::crypto::AccountId32;
use subxt::backend::legacy::LegacyRpcMethods;
use subxt::backend::rpc::reconnecting_rpc_client::{PingConfig, RpcClient as ReconnectingRpcClient};
use subxt::backend::rpc::RpcClient;
use subxt::backend::StorageResponse;
use subxt::config::polkadot::PolkadotExtrinsicParamsBuilder as Params;
use subxt::dynamic::Value;
use subxt::tx::{TxProgress, TxStatus};
use subxt::utils::H256;
use subxt::{OnlineClient, PolkadotConfig};

use crate::error::*;
use crate::ledger::{
    InclusionEvent,
    InclusionKind,
    InclusionStream,
    Instruction,
    LedgerClient,
    RawEntry,
    StorageItem,
};
use crate::signer::Signer;

/// The `API` type represents a connected Substrate client that interacts with the blockchain.
pub type API = OnlineClient<PolkadotConfig>;

/// A connected session with one network's RPC endpoint.
///
/// Dropping the client closes the connection.
pub struct SubxtLedgerClient {
    /// The online client.
    api: API,
    /// Raw RPC methods over the same connection, for batched storage queries.
    rpc: LegacyRpcMethods<PolkadotConfig>,
}

impl SubxtLedgerClient {
    /// Opens a reconnecting websocket connection to `endpoint` and loads its metadata.
    pub async fn connect(endpoint: &str) -> Result<Self> {
        info!("🔵 Connecting to {}", endpoint);

        let reconnecting = ReconnectingRpcClient::builder()
            .max_request_size(50 * 1024 * 1024)
            .max_response_size(50 * 1024 * 1024)
            .request_timeout(Duration::from_secs(60))
            .connection_timeout(Duration::from_secs(10))
            .enable_ws_ping(PingConfig::new())
            .build(endpoint.to_string())
            .await
            .map_err(|e| Error::Connect {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;

        let rpc_client = RpcClient::new(reconnecting);
        let api = API::from_rpc_client(rpc_client.clone())
            .await
            .context(ChainConnectionSnafu)?;

        info!(
            "🟢 Connected to {} (spec version {})",
            endpoint,
            api.runtime_version().spec_version
        );
        Ok(Self {
            api,
            rpc: LegacyRpcMethods::new(rpc_client),
        })
    }

    /// Hash of the latest finalized block; every storage read of a call is pinned to it.
    async fn latest_block(&self) -> Result<H256> {
        Ok(self
            .api
            .backend()
            .latest_finalized_block_ref()
            .await
            .context(LatestBlockSnafu)?
            .hash())
    }
}

#[async_trait]
impl LedgerClient for SubxtLedgerClient {
    async fn enumerate_entries(&self, item: StorageItem) -> Result<Vec<RawEntry>> {
        let at = self.latest_block().await?;
        info!(
            "Enumerating {}::{} at {:?}",
            item.pallet(),
            item.entry(),
            at
        );

        self.api
            .backend()
            .storage_fetch_descendant_values(item.prefix(), at)
            .and_then(|stream| {
                stream
                    .map_ok(|StorageResponse { key, value }| RawEntry { key, value })
                    .try_collect::<Vec<_>>()
            })
            .await
            .context(StorageSnafu {
                pallet: item.pallet(),
                entry: item.entry(),
            })
    }

    async fn point_lookup_many(
        &self,
        item: StorageItem,
        keys: &[AccountId32],
    ) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let at = self.latest_block().await?;
        let storage_keys: Vec<Vec<u8>> = keys.iter().map(|k| item.storage_key(k)).collect();

        query_storage_at(&self.rpc, &storage_keys, at)
            .await
            .context(StorageSnafu {
                pallet: item.pallet(),
                entry: item.entry(),
            })
    }

    async fn submit_batch(
        &self,
        signer: &Signer,
        nonce: u64,
        instructions: &[Instruction],
    ) -> Result<InclusionStream> {
        let calls: Vec<Value> = instructions.iter().map(call_value).collect();
        let batch = subxt::dynamic::tx("Utility", "batch", vec![Value::unnamed_composite(calls)]);
        let tx_params = Params::new().nonce(nonce).build();

        let progress = self
            .api
            .tx()
            .sign_and_submit_then_watch(&batch, signer.keypair(), tx_params)
            .await
            .context(TransactionSnafu)?;

        info!(
            "📡 Submitted batch {:?} with nonce {}",
            progress.extrinsic_hash(),
            nonce
        );
        Ok(inclusion_events(progress))
    }

    async fn runtime_metadata(&self) -> Result<serde_json::Value> {
        let metadata = self.api.metadata();
        let pallets: Vec<serde_json::Value> = metadata
            .pallets()
            .map(|pallet| {
                let storage: Vec<&str> = pallet
                    .storage()
                    .map(|s| s.entries().iter().map(|e| e.name()).collect())
                    .unwrap_or_default();
                let calls: Vec<&str> = pallet
                    .call_variants()
                    .map(|vs| vs.iter().map(|v| v.name.as_str()).collect())
                    .unwrap_or_default();
                let events: Vec<&str> = pallet
                    .event_variants()
                    .map(|vs| vs.iter().map(|v| v.name.as_str()).collect())
                    .unwrap_or_default();
                let errors: Vec<&str> = pallet
                    .error_variants()
                    .map(|vs| vs.iter().map(|v| v.name.as_str()).collect())
                    .unwrap_or_default();
                serde_json::json!({
                    "name": pallet.name(),
                    "index": pallet.index(),
                    "storage": storage,
                    "calls": calls,
                    "events": events,
                    "errors": errors,
                })
            })
            .collect();

        let version = self.api.runtime_version();
        Ok(serde_json::json!({
            "spec_version": version.spec_version,
            "transaction_version": version.transaction_version,
            "pallets": pallets,
        }))
    }
}

/// Reads `keys` at block `at` with a single `state_queryStorageAt` request.
///
/// The result is aligned with `keys`; keys the node reports without a value are `None`.
async fn query_storage_at(
    rpc: &LegacyRpcMethods<PolkadotConfig>,
    keys: &[Vec<u8>],
    at: H256,
) -> Result<Vec<Option<Vec<u8>>>, subxt::Error> {
    let change_sets = rpc
        .state_query_storage_at(keys.iter().map(Vec::as_slice), Some(at))
        .await?;

    let found: HashMap<Vec<u8>, Vec<u8>> = change_sets
        .into_iter()
        .flat_map(|set| set.changes)
        .filter_map(|(key, value)| value.map(|value| (key.0, value.0)))
        .collect();

    Ok(keys.iter().map(|k| found.get(k).cloned()).collect())
}

/// The runtime call for one instruction, as a dynamic value.
fn call_value(instruction: &Instruction) -> Value {
    match instruction {
        Instruction::UpdatePayee { controller } => {
            let controller: &[u8] = controller.as_ref();
            Value::unnamed_variant(
                "Staking",
                [Value::named_variant(
                    "update_payee",
                    [("controller", Value::from_bytes(controller))],
                )],
            )
        }
    }
}

/// Turns the status updates of a submitted extrinsic into [`InclusionEvent`]s.
///
/// Inclusion is reported as soon as the extrinsic lands in a best block, followed by the
/// extrinsic's `ExtrinsicSuccess` / `ExtrinsicFailed` event. The stream ends when the
/// transaction is dropped, invalid, or the subscription errors.
fn inclusion_events(mut progress: TxProgress<PolkadotConfig, API>) -> InclusionStream {
    Box::pin(stream! {
        while let Some(status) = progress.next().await {
            match status {
                Ok(TxStatus::Validated) => debug!("📄 Transaction has been validated."),
                Ok(TxStatus::Broadcasted { num_peers }) => {
                    debug!("📡 Transaction broadcasted to {} peers.", num_peers);
                }
                Ok(TxStatus::InBestBlock(details)) | Ok(TxStatus::InFinalizedBlock(details)) => {
                    let block_hash = details.block_hash();
                    yield InclusionEvent::new(InclusionKind::Included, format!("{block_hash:?}"));

                    let outcomes: Vec<InclusionEvent> = match details.fetch_events().await {
                        Ok(events) => events
                            .iter()
                            .flatten()
                            .filter(|event| event.pallet_name() == "System")
                            .filter_map(|event| match event.variant_name() {
                                "ExtrinsicSuccess" => Some(InclusionEvent::new(
                                    InclusionKind::Succeeded,
                                    format!("{block_hash:?}"),
                                )),
                                "ExtrinsicFailed" => Some(InclusionEvent::new(
                                    InclusionKind::Failed,
                                    format!("{:?}", event.field_values()),
                                )),
                                _ => None,
                            })
                            .collect(),
                        Err(e) => {
                            error!("❌ Error fetching extrinsic events: {}", e);
                            Vec::new()
                        }
                    };
                    for outcome in outcomes {
                        yield outcome;
                    }
                }
                Ok(TxStatus::NoLongerInBestBlock) => {
                    warn!("⚠️ Transaction is no longer in the best block.");
                }
                Ok(TxStatus::Error { message })
                | Ok(TxStatus::Dropped { message })
                | Ok(TxStatus::Invalid { message }) => {
                    error!("❌ Transaction will not be included: {message}");
                    break;
                }
                Err(e) => {
                    error!("❌ Error while watching transaction progress: {}", e);
                    break;
                }
            }
        }
    })
}
