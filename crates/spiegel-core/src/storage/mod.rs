//! Storage port and backends.
//!
//! A [`MirrorStorage`] is bound to one package identity and owns that
//! package's catalog (index plus per-version manifests) and archives. The
//! orchestrator only talks to this trait; [`StorageFactory`] picks the
//! backend.

pub mod fs;
pub mod object;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use spiegel_schema::{
    ArtifactLocation, MirrorIndex, ObjectChecksum, PackageArtifact, PackageIdentity,
    PackageTarget, Platform, VersionManifest,
};
use tracing::warn;

use crate::config::StorageConfig;
use crate::error::MirrorError;
use crate::io::blob::BlobStore;

pub use fs::FsStorage;
pub use object::ObjectStorage;

/// Result of checking a catalog against the stored bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verification {
    pub valid: Vec<PackageArtifact>,
    pub invalid: Vec<PackageArtifact>,
}

#[async_trait]
pub trait MirrorStorage: Send + Sync + fmt::Debug {
    /// The package this storage is bound to.
    fn identity(&self) -> &PackageIdentity;

    /// Read the index and every listed manifest.
    ///
    /// A missing or unreadable index is an error; the caller treats it as a
    /// fresh mirror.
    async fn load_catalog(&self) -> Result<Vec<PackageArtifact>, MirrorError>;

    /// Partition a loaded catalog by whether the stored bytes still match.
    async fn verify_catalog(
        &self,
        catalog: Vec<PackageArtifact>,
    ) -> Result<Verification, MirrorError>;

    /// Targets to fetch: `(invalid ∪ wanted) \ valid`.
    fn reconcile(
        &self,
        valid: &[PackageArtifact],
        invalid: &[PackageArtifact],
        wanted: &[PackageTarget],
    ) -> HashSet<PackageTarget> {
        crate::reconcile::reconcile(valid, invalid, wanted)
    }

    /// Persist verified archive bytes and compute their H1.
    async fn write_artifact(
        &self,
        bytes: &[u8],
        target: &PackageTarget,
    ) -> Result<PackageArtifact, MirrorError>;

    /// Rewrite the catalog so it lists exactly `artifacts`.
    async fn commit(&self, artifacts: &[PackageArtifact]) -> Result<(), MirrorError>;
}

/// Builds a [`MirrorStorage`] per package from one storage configuration.
#[derive(Debug, Clone)]
pub enum StorageFactory {
    Filesystem {
        root: PathBuf,
    },
    ObjectStore {
        store: Arc<dyn BlobStore>,
        prefix: String,
    },
}

impl StorageFactory {
    /// Construct the factory, creating the object-store client if needed.
    pub async fn from_config(config: &StorageConfig) -> Result<Self, MirrorError> {
        match config {
            StorageConfig::Filesystem { root } => Ok(Self::Filesystem { root: root.clone() }),
            #[cfg(feature = "s3")]
            StorageConfig::ObjectStore {
                bucket,
                prefix,
                endpoint,
                region,
            } => {
                let store = crate::io::blob::S3BlobStore::new(
                    bucket,
                    endpoint.as_deref(),
                    region.as_deref(),
                )
                .await;
                Ok(Self::ObjectStore {
                    store: Arc::new(store),
                    prefix: prefix.clone(),
                })
            }
            #[cfg(not(feature = "s3"))]
            StorageConfig::ObjectStore { .. } => Err(MirrorError::Config(
                "object storage requested but spiegel was built without the `s3` feature"
                    .to_string(),
            )),
        }
    }

    pub fn for_package(&self, identity: PackageIdentity) -> Box<dyn MirrorStorage> {
        match self {
            Self::Filesystem { root } => Box::new(FsStorage::new(root.clone(), identity)),
            Self::ObjectStore { store, prefix } => Box::new(ObjectStorage::new(
                Arc::clone(store),
                prefix.clone(),
                identity,
            )),
        }
    }
}

/// Expand one version manifest into artifacts.
///
/// Entries with an unparseable platform key or without exactly one hash are
/// skipped with a warning.
pub(crate) fn manifest_artifacts(
    identity: &PackageIdentity,
    version: &str,
    manifest: &VersionManifest,
    locate: impl Fn(&str) -> ArtifactLocation,
    shadow_for: impl Fn(&str) -> Option<ObjectChecksum>,
) -> Vec<PackageArtifact> {
    let mut artifacts = Vec::with_capacity(manifest.archives.len());

    for (key, entry) in &manifest.archives {
        let Some(platform) = Platform::from_key(key) else {
            warn!(package = %identity, version, key, "Skipping manifest entry with bad platform key");
            continue;
        };
        let [hash] = entry.hashes.as_slice() else {
            warn!(
                package = %identity,
                version,
                key,
                hashes = entry.hashes.len(),
                "Skipping manifest entry without exactly one hash"
            );
            continue;
        };

        artifacts.push(PackageArtifact {
            target: PackageTarget::new(identity.clone(), version, platform),
            h1: hash.as_str().into(),
            location: locate(&entry.url),
            shadow: shadow_for(&entry.url),
        });
    }

    artifacts
}

/// Build the index and per-version manifests listing exactly `artifacts`.
pub(crate) fn build_catalog(
    artifacts: &[PackageArtifact],
) -> (MirrorIndex, BTreeMap<String, VersionManifest>) {
    let mut manifests: BTreeMap<String, VersionManifest> = BTreeMap::new();
    for artifact in artifacts {
        manifests
            .entry(artifact.version().to_string())
            .or_default()
            .insert(
                artifact.target.platform.key(),
                &artifact.h1,
                artifact.filename(),
            );
    }
    let index = MirrorIndex::from_versions(manifests.keys().cloned());
    (index, manifests)
}

pub(crate) fn to_json(value: &impl serde::Serialize, what: &str) -> Result<Vec<u8>, MirrorError> {
    serde_json::to_vec_pretty(value)
        .map_err(|e| MirrorError::storage_with(format!("serializing {what}"), e))
}

pub(crate) fn manifest_file(version: &str) -> String {
    format!("{version}.json")
}
