//! Asset manifest format.
//!
//! An asset manifest enumerates the files and container images a stack
//! references. Each entry carries a content-addressable description of where
//! the asset comes from (its source) and where it must be published to (its
//! destination); both feed into the content-hashed ids of the build/publish
//! work derived from the entry.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading an asset manifest from disk.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read asset manifest {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid asset manifest {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// How a file asset is packaged before upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilePackaging {
    /// Upload the file as-is.
    #[default]
    File,
    /// Zip a directory and upload the archive.
    ZipDirectory,
}

/// Where an asset's content comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetSource {
    /// A file or directory in the synthesis output.
    File {
        path: String,
        #[serde(default)]
        packaging: FilePackaging,
    },
    /// A container image built from a local directory.
    ContainerImage {
        directory: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        build_args: BTreeMap<String, String>,
    },
}

/// Where an asset must be published to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetDestination {
    /// An object-store location (bucket + key).
    ObjectStore {
        bucket: String,
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<String>,
    },
    /// An image registry repository + tag.
    ImageRegistry { repository: String, tag: String },
}

/// One asset in a manifest: a stable id plus its source and destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEntry {
    pub asset_id: String,
    pub source: AssetSource,
    pub destination: AssetDestination,
}

/// The full set of assets referenced by one stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetManifest {
    #[serde(default)]
    pub entries: Vec<AssetEntry>,
}

impl AssetManifest {
    /// Load a manifest from a JSON file in the synthesis output directory.
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ManifestError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}
