//! Object-store backend.
//!
//! Object stores cannot be re-hashed cheaply, so each upload records the
//! store's ETag and the locally computed H1 in a shadow record
//! (`.etag-map.json`) next to the index. An artifact verifies when its object
//! still exists with the recorded ETag and the recorded H1 agrees with the
//! version manifest.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use spiegel_schema::{
    ArtifactLocation, INDEX_FILE, MirrorIndex, ObjectChecksum, PackageArtifact, PackageIdentity,
    PackageTarget, SHADOW_RECORD_FILE, ShadowRecord, VersionManifest,
};
use tracing::{debug, info, warn};

use super::{MirrorStorage, Verification, build_catalog, manifest_artifacts, manifest_file, to_json};
use crate::error::MirrorError;
use crate::h1;
use crate::io::blob::{BlobStore, normalize_etag};

const ZIP_CONTENT_TYPE: &str = "application/zip";
const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone)]
pub struct ObjectStorage {
    store: Arc<dyn BlobStore>,
    prefix: String,
    identity: PackageIdentity,
}

impl ObjectStorage {
    pub fn new(store: Arc<dyn BlobStore>, prefix: String, identity: PackageIdentity) -> Self {
        Self {
            store,
            prefix,
            identity,
        }
    }

    /// Object key for `file` inside this package's directory.
    pub fn key(&self, file: &str) -> String {
        join_key(&[&self.prefix, &self.identity.base_path(), file])
    }

    async fn load_shadow_record(&self) -> Result<ShadowRecord, MirrorError> {
        let key = self.key(SHADOW_RECORD_FILE);
        match self.store.get(&key).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map_err(|e| MirrorError::storage_with(format!("parsing {key}"), e)),
            Err(e) if e.is_not_found() => {
                warn!(package = %self.identity, key, "No shadow record; stored artifacts will be re-fetched");
                Ok(ShadowRecord::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put_json(&self, file: &str, value: &impl serde::Serialize) -> Result<(), MirrorError> {
        let body = to_json(value, file)?;
        self.store
            .put(&self.key(file), body, Some(JSON_CONTENT_TYPE))
            .await?;
        Ok(())
    }
}

/// Join key segments with `/`, dropping empty segments and stray slashes.
pub fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Hash archive bytes through a temporary file.
async fn hash_via_tempfile(bytes: &[u8]) -> Result<spiegel_schema::H1Checksum, MirrorError> {
    let mut file = tempfile::NamedTempFile::new()
        .map_err(|e| MirrorError::storage_with("creating temporary file", e))?;
    file.write_all(bytes)
        .and_then(|()| file.flush())
        .map_err(|e| MirrorError::storage_with("writing temporary file", e))?;

    let hash = tokio::task::spawn_blocking(move || h1::hash_zip_file(file.path()))
        .await
        .map_err(|e| MirrorError::storage_with("hashing task failed", e))??;
    Ok(hash)
}

#[async_trait]
impl MirrorStorage for ObjectStorage {
    fn identity(&self) -> &PackageIdentity {
        &self.identity
    }

    async fn load_catalog(&self) -> Result<Vec<PackageArtifact>, MirrorError> {
        let index_key = self.key(INDEX_FILE);
        let raw = self.store.get(&index_key).await?;
        let index: MirrorIndex = serde_json::from_slice(&raw)
            .map_err(|e| MirrorError::storage_with(format!("parsing {index_key}"), e))?;

        let shadow = self.load_shadow_record().await?;

        let mut artifacts = Vec::new();
        for version in index.version_names() {
            let key = self.key(&manifest_file(version));
            let raw = match self.store.get(&key).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(key, error = %e, "Manifest listed in index is unreadable, skipping");
                    continue;
                }
            };
            let manifest: VersionManifest = match serde_json::from_slice(&raw) {
                Ok(m) => m,
                Err(e) => {
                    warn!(key, error = %e, "Malformed manifest, skipping");
                    continue;
                }
            };

            artifacts.extend(manifest_artifacts(
                &self.identity,
                version,
                &manifest,
                |file| ArtifactLocation::Object(self.key(file)),
                |file| shadow.get(file).cloned(),
            ));
        }

        debug!(package = %self.identity, count = artifacts.len(), "Loaded catalog");
        Ok(artifacts)
    }

    async fn verify_catalog(
        &self,
        catalog: Vec<PackageArtifact>,
    ) -> Result<Verification, MirrorError> {
        let listing = self.store.list(&format!("{}/", self.key(""))).await?;
        let mut verification = Verification::default();

        for artifact in catalog {
            let listed = match &artifact.location {
                ArtifactLocation::Object(key) => listing.get(key),
                ArtifactLocation::File(_) => None,
            };
            let valid = match (listed, &artifact.shadow) {
                (Some(info), Some(shadow)) => {
                    normalize_etag(&info.etag) == normalize_etag(&shadow.etag)
                        && shadow.h1 == artifact.h1
                }
                _ => false,
            };

            if valid {
                verification.valid.push(artifact);
            } else {
                info!(
                    artifact = %artifact.target,
                    present = listed.is_some(),
                    recorded = artifact.shadow.is_some(),
                    "Artifact failed verification"
                );
                verification.invalid.push(artifact);
            }
        }

        Ok(verification)
    }

    async fn write_artifact(
        &self,
        bytes: &[u8],
        target: &PackageTarget,
    ) -> Result<PackageArtifact, MirrorError> {
        let h1 = hash_via_tempfile(bytes).await?;
        let key = self.key(&target.filename());

        let etag = self
            .store
            .put(&key, bytes.to_vec(), Some(ZIP_CONTENT_TYPE))
            .await?;
        if normalize_etag(&etag).is_empty() {
            // Without an ETag the object can never verify; drop it and let the fetch retry.
            self.store.delete(&key).await?;
            return Err(MirrorError::storage(format!(
                "object store returned no ETag for {key}"
            )));
        }

        debug!(artifact = %target, key, etag, %h1, "Uploaded artifact");
        Ok(PackageArtifact {
            target: target.clone(),
            shadow: Some(ObjectChecksum {
                etag,
                h1: h1.clone(),
            }),
            h1,
            location: ArtifactLocation::Object(key),
        })
    }

    async fn commit(&self, artifacts: &[PackageArtifact]) -> Result<(), MirrorError> {
        let (index, manifests) = build_catalog(artifacts);

        let mut shadow = ShadowRecord::new();
        for artifact in artifacts {
            match &artifact.shadow {
                Some(checksum) => {
                    shadow.insert(artifact.filename(), checksum.clone());
                }
                None => {
                    warn!(artifact = %artifact.target, "Committing artifact without shadow record entry");
                }
            }
        }

        for (version, manifest) in &manifests {
            self.put_json(&manifest_file(version), manifest).await?;
        }
        self.put_json(SHADOW_RECORD_FILE, &shadow).await?;
        self.put_json(INDEX_FILE, &index).await?;

        info!(package = %self.identity, versions = manifests.len(), "Committed catalog");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::io::blob::memory::MemoryBlobStore;
    use crate::test_support::make_zip;
    use spiegel_schema::Platform;

    fn target(version: &str) -> PackageTarget {
        PackageTarget::new(
            PackageIdentity::parse("hashicorp/aws").unwrap(),
            version,
            Platform::new("linux", "amd64"),
        )
    }

    fn storage(store: &Arc<MemoryBlobStore>, prefix: &str) -> ObjectStorage {
        ObjectStorage::new(
            Arc::clone(store) as Arc<dyn BlobStore>,
            prefix.to_string(),
            PackageIdentity::parse("hashicorp/aws").unwrap(),
        )
    }

    #[test]
    fn keys_join_cleanly() {
        assert_eq!(join_key(&["", "a/b", "c.json"]), "a/b/c.json");
        assert_eq!(join_key(&["/mirror/", "a/b", "c.json"]), "mirror/a/b/c.json");
        assert_eq!(join_key(&["p", "a", ""]), "p/a");
    }

    #[tokio::test]
    async fn write_commit_load_verify() {
        let store = Arc::new(MemoryBlobStore::default());
        let storage = storage(&store, "mirror");
        let zip = make_zip(&[("terraform-provider-aws", b"bin")]);

        let artifact = storage.write_artifact(&zip, &target("5.0.0")).await.unwrap();
        storage.commit(&[artifact.clone()]).await.unwrap();

        assert_eq!(
            store.keys(),
            vec![
                "mirror/registry.terraform.io/hashicorp/aws/.etag-map.json",
                "mirror/registry.terraform.io/hashicorp/aws/5.0.0.json",
                "mirror/registry.terraform.io/hashicorp/aws/index.json",
                "mirror/registry.terraform.io/hashicorp/aws/terraform-provider-aws_5.0.0_linux_amd64.zip",
            ]
        );

        let catalog = storage.load_catalog().await.unwrap();
        assert_eq!(catalog, vec![artifact.clone()]);

        let verification = storage.verify_catalog(catalog).await.unwrap();
        assert_eq!(verification.valid, vec![artifact]);
        assert!(verification.invalid.is_empty());
    }

    #[tokio::test]
    async fn out_of_band_overwrite_is_invalid() {
        let store = Arc::new(MemoryBlobStore::default());
        let storage = storage(&store, "");
        let artifact = storage
            .write_artifact(&make_zip(&[("x", b"1")]), &target("5.0.0"))
            .await
            .unwrap();
        storage.commit(&[artifact.clone()]).await.unwrap();

        let ArtifactLocation::Object(key) = &artifact.location else {
            panic!("expected object location");
        };
        store.tamper(key, b"something else");

        let catalog = storage.load_catalog().await.unwrap();
        let verification = storage.verify_catalog(catalog).await.unwrap();
        assert!(verification.valid.is_empty());
        assert_eq!(verification.invalid.len(), 1);
    }

    #[tokio::test]
    async fn deleted_object_and_h1_disagreement_are_invalid() {
        let store = Arc::new(MemoryBlobStore::default());
        let storage = storage(&store, "");
        let a = storage
            .write_artifact(&make_zip(&[("x", b"1")]), &target("5.0.0"))
            .await
            .unwrap();
        let mut b = storage
            .write_artifact(&make_zip(&[("x", b"2")]), &target("5.1.0"))
            .await
            .unwrap();

        let ArtifactLocation::Object(key_a) = &a.location else {
            panic!("expected object location");
        };
        store.delete(key_a).await.unwrap();
        b.h1 = "h1:manifest-says-otherwise".into();

        let verification = storage.verify_catalog(vec![a, b]).await.unwrap();
        assert!(verification.valid.is_empty());
        assert_eq!(verification.invalid.len(), 2);
    }

    #[tokio::test]
    async fn missing_shadow_record_loads_but_fails_verification() {
        let store = Arc::new(MemoryBlobStore::default());
        let storage = storage(&store, "");
        let artifact = storage
            .write_artifact(&make_zip(&[("x", b"1")]), &target("5.0.0"))
            .await
            .unwrap();
        storage.commit(&[artifact]).await.unwrap();
        store
            .delete("registry.terraform.io/hashicorp/aws/.etag-map.json")
            .await
            .unwrap();

        let catalog = storage.load_catalog().await.unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog[0].shadow.is_none());
        let verification = storage.verify_catalog(catalog).await.unwrap();
        assert_eq!(verification.invalid.len(), 1);
    }

    #[tokio::test]
    async fn shadow_entry_follows_manifest_url() {
        let store = Arc::new(MemoryBlobStore::default());
        let storage = storage(&store, "");
        let zip = make_zip(&[("x", b"1")]);
        let h1 = h1::hash_zip_bytes(&zip).unwrap();

        let etag = store
            .put(&storage.key("legacy-aws.zip"), zip, None)
            .await
            .unwrap();
        let mut manifest = VersionManifest::default();
        manifest.insert("linux_amd64".into(), &h1, "legacy-aws.zip".into());
        let mut shadow = ShadowRecord::new();
        shadow.insert(
            "legacy-aws.zip".into(),
            ObjectChecksum {
                etag,
                h1: h1.clone(),
            },
        );
        storage.put_json("5.0.0.json", &manifest).await.unwrap();
        storage.put_json(SHADOW_RECORD_FILE, &shadow).await.unwrap();
        storage
            .put_json(INDEX_FILE, &MirrorIndex::from_versions(["5.0.0"]))
            .await
            .unwrap();

        let catalog = storage.load_catalog().await.unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(
            catalog[0].location,
            ArtifactLocation::Object(storage.key("legacy-aws.zip"))
        );
        assert!(catalog[0].shadow.is_some());

        let verification = storage.verify_catalog(catalog).await.unwrap();
        assert_eq!(verification.valid.len(), 1);
        assert!(verification.invalid.is_empty());
    }

    #[tokio::test]
    async fn missing_index_is_an_error() {
        let store = Arc::new(MemoryBlobStore::default());
        assert!(storage(&store, "").load_catalog().await.is_err());
    }

    #[tokio::test]
    async fn upload_without_etag_is_rolled_back() {
        let store = Arc::new(MemoryBlobStore::default());
        store.omit_etags.store(true, Ordering::SeqCst);
        let storage = storage(&store, "");

        let err = storage
            .write_artifact(&make_zip(&[("x", b"1")]), &target("5.0.0"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(store.keys().is_empty());
    }
}
