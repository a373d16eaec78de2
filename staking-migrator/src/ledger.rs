//! # Ledger client capability
//!
//! The snapshot, analysis and migration stages never talk to a node directly. They consume
//! the [`LedgerClient`] trait, which covers exactly the round trips the pipeline needs:
//!
//! - [`LedgerClient::enumerate_entries`]: every raw key/value pair under a storage map.
//! - [`LedgerClient::point_lookup_many`]: many keys of one storage map in a single round trip.
//! - [`LedgerClient::submit_batch`]: sign and submit a batched extrinsic, yielding a lazy
//!   [`InclusionStream`] of status events.
//! - [`LedgerClient::runtime_metadata`]: a JSON rendering of the runtime metadata.
//!
//! Storage keys are built here ([`StorageItem::storage_key`]) and taken apart again by
//! [`crate::decode`]. The production implementation lives in [`crate::substrate`].

use async_trait::async_trait;
use futures::stream::BoxStream;
use sp_core::crypto::AccountId32;
use sp_core::hashing::{blake2_128, twox_128, twox_64};

use crate::error::Result;
use crate::signer::Signer;

/// Hashers used by the storage maps this tool reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageHasher {
    /// `twox_64(key) ++ key`
    Twox64Concat,
    /// `blake2_128(key) ++ key`
    Blake2_128Concat,
}

impl StorageHasher {
    /// Number of hash bytes preceding the concatenated key.
    pub fn hash_len(&self) -> usize {
        match self {
            StorageHasher::Twox64Concat => 8,
            StorageHasher::Blake2_128Concat => 16,
        }
    }

    /// Hashes `key` and appends the key itself.
    pub fn hash_concat(&self, key: &[u8]) -> Vec<u8> {
        let mut out = match self {
            StorageHasher::Twox64Concat => twox_64(key).to_vec(),
            StorageHasher::Blake2_128Concat => blake2_128(key).to_vec(),
        };
        out.extend_from_slice(key);
        out
    }
}

/// Account-keyed storage maps read by the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageItem {
    /// `Staking::Bonded`: stash → controller.
    Bonded,
    /// `Staking::Ledger`: controller → staking ledger.
    Ledger,
    /// `Staking::Payee`: stash → reward destination.
    Payee,
    /// `System::Account`: account → account info (nonce first).
    SystemAccount,
}

impl StorageItem {
    /// Pallet owning the item.
    pub fn pallet(&self) -> &'static str {
        match self {
            StorageItem::SystemAccount => "System",
            _ => "Staking",
        }
    }

    /// Storage entry name inside the pallet.
    pub fn entry(&self) -> &'static str {
        match self {
            StorageItem::Bonded => "Bonded",
            StorageItem::Ledger => "Ledger",
            StorageItem::Payee => "Payee",
            StorageItem::SystemAccount => "Account",
        }
    }

    /// Hasher of the single map key.
    pub fn hasher(&self) -> StorageHasher {
        match self {
            StorageItem::Bonded | StorageItem::Payee => StorageHasher::Twox64Concat,
            StorageItem::Ledger | StorageItem::SystemAccount => StorageHasher::Blake2_128Concat,
        }
    }

    /// `twox_128(pallet) ++ twox_128(entry)`
    pub fn prefix(&self) -> Vec<u8> {
        let mut prefix = twox_128(self.pallet().as_bytes()).to_vec();
        prefix.extend_from_slice(&twox_128(self.entry().as_bytes()));
        prefix
    }

    /// Full storage key of `account` in this map.
    pub fn storage_key(&self, account: &AccountId32) -> Vec<u8> {
        let mut key = self.prefix();
        key.extend(self.hasher().hash_concat(account.as_ref()));
        key
    }
}

/// An undecoded storage entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawEntry {
    /// Full storage key.
    pub key: Vec<u8>,
    /// SCALE encoded value.
    pub value: Vec<u8>,
}

/// A single call placed inside a migration batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    /// `Staking::update_payee(controller)`: moves a `Controller` payee to `Account(controller)`.
    UpdatePayee {
        /// Controller whose stash is migrated.
        controller: AccountId32,
    },
}

/// Kinds of status events reported for a submitted extrinsic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InclusionKind {
    /// The extrinsic landed in a block; execution result not yet known.
    Included,
    /// `System::ExtrinsicSuccess` was emitted for the extrinsic.
    Succeeded,
    /// `System::ExtrinsicFailed` was emitted for the extrinsic.
    Failed,
}

/// One status event of a submitted extrinsic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InclusionEvent {
    /// What happened.
    pub kind: InclusionKind,
    /// Free-form detail (block hash, dispatch error, ...).
    pub detail: String,
}

impl InclusionEvent {
    /// Shorthand constructor.
    pub fn new(kind: InclusionKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// Lazy event sequence of one submission. Dropping it cancels the subscription.
pub type InclusionStream = BoxStream<'static, InclusionEvent>;

/// The ledger operations consumed by the snapshot, analysis and migration stages.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Enumerates every entry of `item`, in the order the node returns them.
    async fn enumerate_entries(&self, item: StorageItem) -> Result<Vec<RawEntry>>;

    /// Looks up `keys` of `item` in one round trip.
    ///
    /// The result is aligned with `keys`; absent entries are `None`.
    async fn point_lookup_many(
        &self,
        item: StorageItem,
        keys: &[AccountId32],
    ) -> Result<Vec<Option<Vec<u8>>>>;

    /// Looks up a single key of `item`.
    async fn point_lookup(&self, item: StorageItem, key: &AccountId32) -> Result<Option<Vec<u8>>> {
        Ok(self
            .point_lookup_many(item, std::slice::from_ref(key))
            .await?
            .pop()
            .flatten())
    }

    /// Wraps `instructions` into one `Utility::batch`, signs it with `signer` at `nonce`
    /// and submits it.
    ///
    /// Returning `Ok` means the node accepted the extrinsic for broadcast.
    async fn submit_batch(
        &self,
        signer: &Signer,
        nonce: u64,
        instructions: &[Instruction],
    ) -> Result<InclusionStream>;

    /// Runtime metadata summarized as JSON.
    async fn runtime_metadata(&self) -> Result<serde_json::Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_keys_end_with_the_hashed_account() {
        let account = AccountId32::new([9u8; 32]);

        let bonded = StorageItem::Bonded.storage_key(&account);
        assert_eq!(bonded.len(), 32 + 8 + 32);
        assert!(bonded.starts_with(&StorageItem::Bonded.prefix()));
        assert_eq!(&bonded[40..], AsRef::<[u8]>::as_ref(&account));

        let ledger = StorageItem::Ledger.storage_key(&account);
        assert_eq!(ledger.len(), 32 + 16 + 32);
        assert_eq!(&ledger[32..48], &blake2_128(account.as_ref())[..]);
    }

    #[test]
    fn prefixes_are_distinct_per_item() {
        let items = [
            StorageItem::Bonded,
            StorageItem::Ledger,
            StorageItem::Payee,
            StorageItem::SystemAccount,
        ];
        for a in items {
            for b in items {
                assert_eq!(a == b, a.prefix() == b.prefix());
            }
        }
    }
}
