//! Versioned JSON cache artifacts.
//!
//! Every artifact is a single pretty-printed document:
//!
//! ```json
//! { "version": 1, "network": "westend", "kind": "bonded", "entries": [ ["5F..", "5G.."] ] }
//! ```
//!
//! Readers reject any other schema version, kind or network instead of guessing at the layout.
use std::io::ErrorKind;
use std::path::Path;

use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tokio::io::AsyncWriteExt;

use crate::error::*;
use crate::network::Network;

/// Schema version written into, and required from, every artifact.
pub const SCHEMA_VERSION: u32 = 1;

/// What an artifact holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// The full `Staking::Bonded` snapshot.
    Bonded,
    /// Controllers of the non-self-referential subset of the snapshot.
    Unique,
    /// Summarized runtime metadata.
    Metadata,
}

impl ArtifactKind {
    /// Leading component of the artifact file name.
    pub fn file_prefix(&self) -> &'static str {
        match self {
            ArtifactKind::Bonded => "bonded",
            ArtifactKind::Unique => "unique",
            ArtifactKind::Metadata => "metadata",
        }
    }
}

/// The on-disk envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct Artifact<T> {
    /// Schema version, always [`SCHEMA_VERSION`] when written by this build.
    pub version: u32,
    /// Network the entries belong to.
    pub network: Network,
    /// Kind of entries.
    pub kind: ArtifactKind,
    /// The payload.
    pub entries: T,
}

/// How [`write`] treats an artifact that already exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// Leave an existing file untouched.
    CreateNew,
    /// Replace an existing file.
    Overwrite,
}

/// Reads the entries of an artifact.
///
/// Returns `Ok(None)` when no file exists at `path`.
pub async fn read<T: DeserializeOwned>(
    path: &Path,
    network: Network,
    kind: ArtifactKind,
) -> Result<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).context(ArtifactReadSnafu { path }),
    };

    let document: serde_json::Value =
        serde_json::from_slice(&bytes).context(ArtifactParseSnafu { path })?;

    // pre-versioning artifacts were bare arrays and count as version 0
    let found = document
        .get("version")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0);
    if found != u64::from(SCHEMA_VERSION) {
        return SchemaVersionMismatchSnafu {
            path,
            found,
            expected: SCHEMA_VERSION,
        }
        .fail();
    }

    let artifact: Artifact<T> =
        serde_json::from_value(document).context(ArtifactParseSnafu { path })?;
    if artifact.network != network || artifact.kind != kind {
        return ArtifactMismatchSnafu {
            path,
            found_kind: artifact.kind,
            found_network: artifact.network,
            expected_kind: kind,
            expected_network: network,
        }
        .fail();
    }

    Ok(Some(artifact.entries))
}

/// Serializes `entries` into an artifact at `path`.
///
/// Returns whether the file was written; under [`WriteMode::CreateNew`] an existing file is
/// kept as is.
pub async fn write<T: Serialize>(
    path: &Path,
    network: Network,
    kind: ArtifactKind,
    entries: &T,
    mode: WriteMode,
) -> Result<bool> {
    let artifact = Artifact {
        version: SCHEMA_VERSION,
        network,
        kind,
        entries,
    };
    let bytes = serde_json::to_vec_pretty(&artifact).context(ArtifactSerializeSnafu { path })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .context(ArtifactWriteSnafu { path })?;
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true);
    match mode {
        WriteMode::CreateNew => options.create_new(true),
        WriteMode::Overwrite => options.create(true).truncate(true),
    };

    let mut file = match options.open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            warn!("⚠️ Artifact '{}' already exists, not overwriting", path.display());
            return Ok(false);
        }
        Err(e) => return Err(e).context(ArtifactWriteSnafu { path }),
    };

    file.write_all(&bytes)
        .await
        .context(ArtifactWriteSnafu { path })?;
    file.flush().await.context(ArtifactWriteSnafu { path })?;

    info!("Wrote {} artifact '{}'", kind.file_prefix(), path.display());
    Ok(true)
}
