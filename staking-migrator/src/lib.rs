//! # Staking Controller Migration Library
//!
//! Snapshots the `Staking::Bonded` stash → controller relation of the Polkadot relay chains,
//! measures how many stashes still delegate to a distinct controller, and migrates stashes
//! whose reward destination is `Controller` to an explicit `Account(controller)` payee using
//! signed, nonce-sequenced `Utility::batch` transactions.

/// Deduplication and activity analysis, and the payee filter.
pub mod analyzer;

/// Versioned JSON cache artifacts.
pub mod artifact;

/// SCALE decoders for the staking storage this crate reads.
pub mod decode;

/// Error handling module.
///
/// Defines a custom error type using the `snafu` crate for failures while talking to a node,
/// handling cache artifacts, and deriving keys.
pub mod error;

/// The ledger client trait consumed by every pipeline stage.
pub mod ledger;

/// Batch migration engine.
pub mod migration;

/// Data models
pub mod model;

/// Supported networks, their endpoints and address formats.
pub mod network;

/// Per-network wiring of snapshot, analysis, migration and metadata dumps.
pub mod orchestrator;

/// Signing keys derived from a secret phrase.
pub mod signer;

/// Snapshot cache
pub mod snapshot;

/// `subxt` implementation of the ledger client.
pub mod substrate;

#[cfg(test)]
mod test_utils;
