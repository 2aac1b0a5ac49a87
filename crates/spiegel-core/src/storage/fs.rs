//! Local filesystem backend.
//!
//! Files live under `{root}/{hostname}/{owner}/{name}/`. Verification re-hashes
//! every archive, so a partially written or hand-edited file is caught and
//! re-fetched on the next run.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use spiegel_schema::{
    ArtifactLocation, INDEX_FILE, MirrorIndex, PackageArtifact, PackageIdentity, PackageTarget,
    VersionManifest,
};
use tokio::fs;
use tracing::{debug, info, warn};

use super::{MirrorStorage, Verification, build_catalog, manifest_artifacts, manifest_file, to_json};
use crate::error::MirrorError;
use crate::h1;

#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
    identity: PackageIdentity,
}

impl FsStorage {
    pub fn new(root: PathBuf, identity: PackageIdentity) -> Self {
        Self { root, identity }
    }

    /// `{root}/{hostname}/{owner}/{name}`.
    pub fn package_dir(&self) -> PathBuf {
        self.root
            .join(&self.identity.hostname)
            .join(&self.identity.owner)
            .join(&self.identity.name)
    }

    async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), MirrorError> {
        fs::write(path, bytes)
            .await
            .map_err(|e| MirrorError::storage_with(format!("writing {}", path.display()), e))
    }

    async fn hash_file(path: PathBuf) -> Result<spiegel_schema::H1Checksum, MirrorError> {
        let hash = tokio::task::spawn_blocking(move || h1::hash_zip_file(&path))
            .await
            .map_err(|e| MirrorError::storage_with("hashing task failed", e))??;
        Ok(hash)
    }
}

#[async_trait]
impl MirrorStorage for FsStorage {
    fn identity(&self) -> &PackageIdentity {
        &self.identity
    }

    async fn load_catalog(&self) -> Result<Vec<PackageArtifact>, MirrorError> {
        let dir = self.package_dir();
        let index_path = dir.join(INDEX_FILE);

        let raw = fs::read(&index_path).await.map_err(|e| {
            MirrorError::storage_with(format!("reading {}", index_path.display()), e)
        })?;
        let index: MirrorIndex = serde_json::from_slice(&raw).map_err(|e| {
            MirrorError::storage_with(format!("parsing {}", index_path.display()), e)
        })?;

        let mut artifacts = Vec::new();
        for version in index.version_names() {
            let path = dir.join(manifest_file(version));
            let raw = match fs::read(&path).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Manifest listed in index is unreadable, skipping");
                    continue;
                }
            };
            let manifest: VersionManifest = match serde_json::from_slice(&raw) {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Malformed manifest, skipping");
                    continue;
                }
            };
            artifacts.extend(manifest_artifacts(
                &self.identity,
                version,
                &manifest,
                |file| ArtifactLocation::File(dir.join(file)),
                |_| None,
            ));
        }

        debug!(package = %self.identity, count = artifacts.len(), "Loaded catalog");
        Ok(artifacts)
    }

    async fn verify_catalog(
        &self,
        catalog: Vec<PackageArtifact>,
    ) -> Result<Verification, MirrorError> {
        let mut verification = Verification::default();

        for artifact in catalog {
            let ArtifactLocation::File(path) = &artifact.location else {
                warn!(artifact = %artifact.target, "Non-file location in filesystem catalog");
                verification.invalid.push(artifact);
                continue;
            };

            match Self::hash_file(path.clone()).await {
                Ok(actual) if actual == artifact.h1 => verification.valid.push(artifact),
                Ok(actual) => {
                    info!(artifact = %artifact.target, expected = %artifact.h1, %actual, "H1 mismatch");
                    verification.invalid.push(artifact);
                }
                Err(e) => {
                    info!(artifact = %artifact.target, error = %e, "Artifact unreadable");
                    verification.invalid.push(artifact);
                }
            }
        }

        Ok(verification)
    }

    async fn write_artifact(
        &self,
        bytes: &[u8],
        target: &PackageTarget,
    ) -> Result<PackageArtifact, MirrorError> {
        let dir = self.package_dir();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| MirrorError::storage_with(format!("creating {}", dir.display()), e))?;

        let path = dir.join(target.filename());
        Self::write_file(&path, bytes).await?;
        let h1 = Self::hash_file(path.clone()).await?;

        debug!(artifact = %target, path = %path.display(), %h1, "Wrote artifact");
        Ok(PackageArtifact {
            target: target.clone(),
            h1,
            location: ArtifactLocation::File(path),
            shadow: None,
        })
    }

    async fn commit(&self, artifacts: &[PackageArtifact]) -> Result<(), MirrorError> {
        let dir = self.package_dir();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| MirrorError::storage_with(format!("creating {}", dir.display()), e))?;

        let (index, manifests) = build_catalog(artifacts);

        // Manifests first so the index never names a version without one.
        for (version, manifest) in &manifests {
            let path = dir.join(manifest_file(version));
            Self::write_file(&path, &to_json(manifest, "manifest")?).await?;
        }
        Self::write_file(&dir.join(INDEX_FILE), &to_json(&index, "index")?).await?;

        info!(package = %self.identity, versions = manifests.len(), "Committed catalog");
        Ok(())
    }
}
