//! Persisted mirror catalog formats.
//!
//! Layout under `{hostname}/{owner}/{name}/`:
//!
//! ```text
//! index.json        {"versions": {"5.0.0": {}, ...}}
//! 5.0.0.json        {"archives": {"linux_amd64": {"hashes": ["h1:..."], "url": "<filename>"}}}
//! .etag-map.json    {"<filename>": {"ETag": "...", "H1Checksum": "..."}}   (object store only)
//! ```
//!
//! Maps are `BTreeMap` so serialized output is stable across runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hash::H1Checksum;

/// The per-package version index (`index.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MirrorIndex {
    /// Mirrored versions. Values are currently always empty objects.
    #[serde(default)]
    pub versions: BTreeMap<String, serde_json::Map<String, serde_json::Value>>,
}

impl MirrorIndex {
    /// Build an index listing exactly `versions`.
    pub fn from_versions<I, S>(versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            versions: versions
                .into_iter()
                .map(|v| (v.into(), serde_json::Map::new()))
                .collect(),
        }
    }

    /// Iterate over the listed version strings in sorted order.
    pub fn version_names(&self) -> impl Iterator<Item = &str> {
        self.versions.keys().map(String::as_str)
    }
}

/// One platform entry inside a version manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Recorded checksums. The mirror only ever writes exactly one `h1:` hash.
    #[serde(default)]
    pub hashes: Vec<String>,
    /// Archive file name, relative to the package directory.
    pub url: String,
}

/// The per-version manifest (`<version>.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionManifest {
    /// Archives keyed by `{os}_{arch}`.
    #[serde(default)]
    pub archives: BTreeMap<String, ArchiveEntry>,
}

impl VersionManifest {
    /// Record one archive under its platform key.
    pub fn insert(&mut self, platform_key: String, h1: &H1Checksum, filename: String) {
        self.archives.insert(
            platform_key,
            ArchiveEntry {
                hashes: vec![h1.as_str().to_string()],
                url: filename,
            },
        );
    }
}

/// Object-store verification token recorded when an archive is uploaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectChecksum {
    /// ETag returned by the upload.
    #[serde(rename = "ETag")]
    pub etag: String,
    /// H1 computed locally before the upload.
    #[serde(rename = "H1Checksum")]
    pub h1: H1Checksum,
}

/// The shadow record (`.etag-map.json`): archive file name to token.
pub type ShadowRecord = BTreeMap<String, ObjectChecksum>;
