use std::path::PathBuf;

use snafu::Snafu;

use crate::artifact::ArtifactKind;
use crate::network::Network;

/// Represents errors that can occur while talking to the ledger, reading or writing cache
/// artifacts, and deriving signing keys.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The RPC transport to a network endpoint could not be established.
    #[snafu(display("Failed to connect to {endpoint}: {message}"))]
    Connect {
        /// The endpoint we tried to reach.
        endpoint: String,
        /// Description of the transport error.
        message: String,
    },

    /// Error when building the online client on top of an established connection.
    #[snafu(display("Error connecting to chain: {source}"))]
    ChainConnectionError {
        /// The underlying error from the `subxt` library.
        source: subxt::Error,
    },

    /// Error when resolving the block that storage reads are pinned to.
    #[snafu(display("Error fetching latest finalized block: {source}"))]
    LatestBlock {
        /// The underlying error from the `subxt` library.
        source: subxt::Error,
    },

    /// Error while enumerating or looking up a storage item.
    #[snafu(display("Error reading storage {pallet}::{entry}: {source}"))]
    Storage {
        /// Pallet owning the storage item.
        pallet: &'static str,
        /// Name of the storage item.
        entry: &'static str,
        /// The underlying error from the `subxt` library.
        source: subxt::Error,
    },

    /// Error when signing or submitting a transaction.
    #[snafu(display("Error submitting tx: {source}"))]
    TransactionError {
        /// The underlying error from the `subxt` library.
        source: subxt::Error,
    },

    /// The secret phrase could not be parsed as a secret URI.
    #[snafu(display("Failed to parse signing phrase: {source}"))]
    SecretUriParse {
        /// The underlying parse error.
        source: subxt_signer::SecretUriError,
    },

    /// The sr25519 keypair could not be derived from the secret URI.
    #[snafu(display("Failed to derive sr25519 keypair: {source}"))]
    KeypairCreationError {
        /// The underlying derivation error.
        source: subxt_signer::sr25519::Error,
    },

    /// An address string is not a valid SS58 account.
    #[snafu(display("Invalid address '{address}': {message}"))]
    InvalidAddress {
        /// The offending address string.
        address: String,
        /// Why the address was rejected.
        message: String,
    },

    /// A stash has no bonded controller on chain.
    #[snafu(display("Stash {stash} has no bonded controller"))]
    ControllerNotFound {
        /// The stash whose controller is missing.
        stash: String,
    },

    /// A stored value could not be decoded.
    #[snafu(display("Failed to decode value for {context}: {source}"))]
    Decode {
        /// What was being decoded.
        context: String,
        /// The underlying decode error.
        source: crate::decode::DecodeError,
    },

    /// Error reading a cache artifact from disk.
    #[snafu(display("Failed to read artifact '{}': {source}", path.display()))]
    ArtifactRead {
        /// Path of the artifact.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Error writing a cache artifact to disk.
    #[snafu(display("Failed to write artifact '{}': {source}", path.display()))]
    ArtifactWrite {
        /// Path of the artifact.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A cache artifact is not valid JSON for its kind.
    #[snafu(display("Malformed artifact '{}': {source}", path.display()))]
    ArtifactParse {
        /// Path of the artifact.
        path: PathBuf,
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// A cache artifact could not be serialized.
    #[snafu(display("Failed to serialize artifact '{}': {source}", path.display()))]
    ArtifactSerialize {
        /// Path of the artifact.
        path: PathBuf,
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// A cache artifact was written with a different schema version.
    #[snafu(display(
        "Artifact '{}' has schema version {found}, expected {expected}",
        path.display()
    ))]
    SchemaVersionMismatch {
        /// Path of the artifact.
        path: PathBuf,
        /// The version found in the file, if any.
        found: u64,
        /// The version this build reads and writes.
        expected: u32,
    },

    /// A cache artifact belongs to another network or artifact kind.
    #[snafu(display(
        "Artifact '{}' holds {found_kind:?} for {found_network}, expected {expected_kind:?} for {expected_network}",
        path.display()
    ))]
    ArtifactMismatch {
        /// Path of the artifact.
        path: PathBuf,
        /// Kind recorded in the file.
        found_kind: ArtifactKind,
        /// Network recorded in the file.
        found_network: Network,
        /// Kind the caller asked for.
        expected_kind: ArtifactKind,
        /// Network the caller asked for.
        expected_network: Network,
    },
}

/// Type alias for results that return a `Result<T, Error>`, simplifying error handling.
pub type Result<T, E = Error> = std::result::Result<T, E>;
