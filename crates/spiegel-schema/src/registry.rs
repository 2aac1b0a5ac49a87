//! Registry HTTP API response bodies.
//!
//! Only the fields the mirror reads are required; everything else defaults so
//! that registries returning a subset still deserialize.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hash::Sha256Digest;
use crate::identity::Platform;

/// `GET /v1/providers/{owner}/{name}/versions`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderVersions {
    /// Registry-assigned identifier, e.g. `hashicorp/aws`.
    #[serde(default)]
    pub id: Option<String>,
    /// Every published version with its platforms.
    pub versions: Vec<ProviderVersion>,
    /// Registry warnings (deprecations, renames).
    #[serde(default)]
    pub warnings: Option<Vec<String>>,
}

/// One published version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderVersion {
    /// Version string as published (not necessarily valid semver).
    pub version: String,
    /// Supported plugin protocol versions.
    #[serde(default)]
    pub protocols: Vec<String>,
    /// Platforms an archive exists for.
    #[serde(default)]
    pub platforms: Vec<Platform>,
}

impl ProviderVersion {
    /// Whether an archive for exactly this OS/arch pair is published.
    pub fn has_platform(&self, platform: &Platform) -> bool {
        self.platforms.iter().any(|p| p == platform)
    }
}

/// A signing key attached to a download descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKey {
    /// GPG key id.
    #[serde(default)]
    pub key_id: String,
    /// ASCII-armored public key.
    #[serde(default)]
    pub ascii_armor: String,
    /// Trust signature, if any.
    #[serde(default)]
    pub trust_signature: String,
    /// Key source name.
    #[serde(default)]
    pub source: String,
    /// Key source URL.
    #[serde(default)]
    pub source_url: String,
}

/// `GET /v1/providers/{owner}/{name}/{version}/download/{os}/{arch}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadDescriptor {
    /// Supported plugin protocol versions.
    #[serde(default)]
    pub protocols: Vec<String>,
    /// Operating system of the archive.
    #[serde(default)]
    pub os: String,
    /// Architecture of the archive.
    #[serde(default)]
    pub arch: String,
    /// File name the registry suggests for the archive.
    #[serde(default)]
    pub filename: String,
    /// Direct, short-lived download URL.
    pub download_url: String,
    /// URL of the `SHA256SUMS` file.
    #[serde(default)]
    pub shasums_url: String,
    /// URL of the detached `SHA256SUMS` signature.
    #[serde(default)]
    pub shasums_signature_url: String,
    /// Expected SHA-256 of the archive bytes.
    pub shasum: Sha256Digest,
    /// Signing keys grouped by kind (`gpg_public_keys`).
    #[serde(default)]
    pub signing_keys: BTreeMap<String, Vec<SigningKey>>,
}
