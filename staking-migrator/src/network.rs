//! The fixed set of relay chains this tool knows how to talk to.
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sp_core::crypto::Ss58AddressFormat;

use crate::artifact::ArtifactKind;

/// A relay chain whose staking state can be snapshotted and migrated.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Polkadot relay chain
    Polkadot,
    /// Kusama relay chain
    Kusama,
    /// Westend test network
    Westend,
}

impl Network {
    /// Every network, in the order a full statistics run visits them.
    pub const ALL: [Network; 3] = [Network::Polkadot, Network::Kusama, Network::Westend];

    /// Lowercase name used in artifact file names and key derivation paths.
    pub fn name(&self) -> &'static str {
        match self {
            Network::Polkadot => "polkadot",
            Network::Kusama => "kusama",
            Network::Westend => "westend",
        }
    }

    /// Public RPC endpoint for this network.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Network::Polkadot => "wss://apps-rpc.polkadot.io",
            Network::Kusama => "wss://kusama-rpc.polkadot.io",
            Network::Westend => "wss://westend-rpc.polkadot.io",
        }
    }

    /// SS58 address prefix used when rendering accounts of this network.
    pub fn ss58_prefix(&self) -> u16 {
        match self {
            Network::Polkadot => 0,
            Network::Kusama => 2,
            Network::Westend => 42,
        }
    }

    /// [`Network::ss58_prefix`] as the format type `sp-core` expects.
    pub fn ss58_format(&self) -> Ss58AddressFormat {
        Ss58AddressFormat::custom(self.ss58_prefix())
    }

    /// Hard derivation suffix appended to the signing phrase for this network.
    pub fn derivation_suffix(&self) -> String {
        format!("//{}", self.name())
    }

    /// Path of the `kind` artifact for this network inside `cache_dir`.
    pub fn artifact_path(&self, cache_dir: &Path, kind: ArtifactKind) -> PathBuf {
        cache_dir.join(format!("{}-{}.json", kind.file_prefix(), self.name()))
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
