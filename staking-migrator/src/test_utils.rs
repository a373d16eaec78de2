//! Test doubles shared by the unit tests of the pipeline stages.
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use codec::{Compact, Encode};
use futures::stream::{self, StreamExt};
use rand::Rng;
use sp_core::crypto::AccountId32;
use subxt_signer::sr25519::dev;

use crate::error::{Error, Result};
use crate::ledger::{
    InclusionEvent,
    InclusionKind,
    InclusionStream,
    Instruction,
    LedgerClient,
    RawEntry,
    StorageItem,
};
use crate::network::Network;
use crate::signer::Signer;

/// A scratch directory for artifact tests, removed again on `Drop`.
pub struct TestDirectory {
    /// The path of the created directory.
    pub path: PathBuf,
}

impl TestDirectory {
    /// Creates a fresh directory with a random name under the system temp dir.
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let name: u128 = rng.gen();
        let path = std::env::temp_dir()
            .join("staking-migrator-tests")
            .join(name.to_string());

        std::fs::create_dir_all(&path).unwrap();

        TestDirectory { path }
    }
}

impl Drop for TestDirectory {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.path).unwrap();
    }
}

/// The fixed 32-byte account `[n; 32]`.
pub fn account(n: u8) -> AccountId32 {
    AccountId32::new([n; 32])
}

/// Signer used by every migration test.
pub fn test_signer() -> Signer {
    Signer::new(dev::alice(), Network::Westend)
}

/// A `Staking::Bonded` entry for `stash → controller`.
pub fn bonded_entry(stash: &AccountId32, controller: &AccountId32) -> RawEntry {
    RawEntry {
        key: StorageItem::Bonded.storage_key(stash),
        value: controller.encode(),
    }
}

/// A `Staking::Payee` entry with the given `RewardDestination` encoding.
pub fn payee_entry(stash: &AccountId32, destination: &[u8]) -> RawEntry {
    RawEntry {
        key: StorageItem::Payee.storage_key(stash),
        value: destination.to_vec(),
    }
}

/// A `StakingLedger` value with empty unlocking and reward vectors.
pub fn ledger_value(stash: &AccountId32, total: u128, active: u128) -> Vec<u8> {
    let mut value = stash.encode();
    Compact(total).encode_to(&mut value);
    Compact(active).encode_to(&mut value);
    value.extend([0u8, 0u8]);
    value
}

/// An `AccountInfo` value whose nonce is `nonce`.
pub fn account_info_value(nonce: u32) -> Vec<u8> {
    let mut value = nonce.encode();
    // consumers, providers, sufficients, then four u128 balances and flags
    value.extend([0u8; 12 + 16 * 4]);
    value
}

/// How the [`MockLedger`] answers the next `submit_batch` call.
#[derive(Clone, Copy, Debug)]
pub enum Scripted {
    /// Accepted, included, `ExtrinsicSuccess`.
    Succeed,
    /// Accepted, included, `ExtrinsicFailed`.
    Fail,
    /// Rejected by the node before acceptance.
    Reject,
    /// Accepted, but no event ever arrives.
    Hang,
    /// Accepted and included, then the subscription closes without a terminal event.
    EndWithoutTerminal,
}

/// One call to `submit_batch`, accepted or not.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedSubmission {
    /// Nonce the batch was signed with.
    pub nonce: u64,
    /// The batched calls.
    pub instructions: Vec<Instruction>,
}

/// In-memory [`LedgerClient`] with call counters and scripted submissions.
#[derive(Default)]
pub struct MockLedger {
    entries: HashMap<StorageItem, Vec<RawEntry>>,
    values: HashMap<(StorageItem, AccountId32), Vec<u8>>,
    failing: HashSet<(StorageItem, AccountId32)>,
    script: Mutex<VecDeque<Scripted>>,
    submissions: Mutex<Vec<RecordedSubmission>>,
    /// Number of `enumerate_entries` calls.
    pub enumerate_calls: AtomicUsize,
    /// Number of `point_lookup_many` round trips.
    pub lookup_calls: AtomicUsize,
}

impl MockLedger {
    /// An empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries returned when enumerating `item`.
    pub fn with_entries(mut self, item: StorageItem, entries: Vec<RawEntry>) -> Self {
        self.entries.insert(item, entries);
        self
    }

    /// A value answered to point lookups of `key` in `item`.
    pub fn with_value(mut self, item: StorageItem, key: AccountId32, value: Vec<u8>) -> Self {
        self.values.insert((item, key), value);
        self
    }

    /// Makes point lookups of `key` in `item` fail with a transport error.
    pub fn with_failing_lookup(mut self, item: StorageItem, key: AccountId32) -> Self {
        self.failing.insert((item, key));
        self
    }

    /// Answers for successive submissions; unscripted submissions succeed.
    pub fn with_script(self, script: impl IntoIterator<Item = Scripted>) -> Self {
        self.script.lock().unwrap().extend(script);
        self
    }

    /// Every submission attempt so far.
    pub fn submissions(&self) -> Vec<RecordedSubmission> {
        self.submissions.lock().unwrap().clone()
    }

    /// Nonces of every submission attempt so far.
    pub fn submitted_nonces(&self) -> Vec<u64> {
        self.submissions().iter().map(|s| s.nonce).collect()
    }
}

fn transport_error(item: StorageItem, message: &str) -> Error {
    Error::Storage {
        pallet: item.pallet(),
        entry: item.entry(),
        source: subxt::Error::Other(message.to_string()),
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn enumerate_entries(&self, item: StorageItem) -> Result<Vec<RawEntry>> {
        self.enumerate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.get(&item).cloned().unwrap_or_default())
    }

    async fn point_lookup_many(
        &self,
        item: StorageItem,
        keys: &[AccountId32],
    ) -> Result<Vec<Option<Vec<u8>>>> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        keys.iter()
            .map(|key| {
                if self.failing.contains(&(item, key.clone())) {
                    return Err(transport_error(item, "connection reset"));
                }
                Ok(self.values.get(&(item, key.clone())).cloned())
            })
            .collect()
    }

    async fn submit_batch(
        &self,
        _signer: &Signer,
        nonce: u64,
        instructions: &[Instruction],
    ) -> Result<InclusionStream> {
        self.submissions.lock().unwrap().push(RecordedSubmission {
            nonce,
            instructions: instructions.to_vec(),
        });

        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Scripted::Succeed);
        let included = InclusionEvent::new(InclusionKind::Included, "0xb10c");
        let events = match next {
            Scripted::Succeed => stream::iter(vec![
                included,
                InclusionEvent::new(InclusionKind::Succeeded, "0xb10c"),
            ])
            .boxed(),
            Scripted::Fail => stream::iter(vec![
                included,
                InclusionEvent::new(InclusionKind::Failed, "BadOrigin"),
            ])
            .boxed(),
            Scripted::Reject => {
                return Err(Error::TransactionError {
                    source: subxt::Error::Other("priority is too low".to_string()),
                })
            }
            Scripted::Hang => stream::pending().boxed(),
            Scripted::EndWithoutTerminal => stream::iter(vec![included]).boxed(),
        };
        Ok(events)
    }

    async fn runtime_metadata(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({
            "spec_version": 1_017_001,
            "transaction_version": 26,
            "pallets": [{ "name": "Staking", "index": 6 }],
        }))
    }
}
