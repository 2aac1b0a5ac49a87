//! Download, verify and store one target, with retry.

use std::time::Duration;

use spiegel_schema::{PackageArtifact, PackageTarget};
use tracing::{debug, warn};

use crate::error::MirrorError;
use crate::io::download::download_verified;
use crate::registry::RegistryClient;
use crate::storage::MirrorStorage;

/// Retry schedule for a single target.
///
/// Before attempt `i` (0-based, `i > 0`) the fetcher waits `i² × backoff_unit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff_unit.saturating_mul(attempt.saturating_mul(attempt))
    }
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    registry: RegistryClient,
    retry: RetryPolicy,
}

impl Fetcher {
    pub fn new(registry: RegistryClient, retry: RetryPolicy) -> Self {
        Self { registry, retry }
    }

    /// Fetch `target` into `storage`, retrying transient failures.
    ///
    /// Returns the last error once attempts are exhausted.
    pub async fn fetch(
        &self,
        target: &PackageTarget,
        storage: &dyn MirrorStorage,
    ) -> Result<PackageArtifact, MirrorError> {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                let delay = self.retry.delay_before(attempt);
                debug!(artifact = %target, attempt, ?delay, "Backing off");
                tokio::time::sleep(delay).await;
            }

            match self.try_fetch(target, storage).await {
                Ok(artifact) => return Ok(artifact),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    warn!(artifact = %target, attempt = attempt + 1, max = attempts, error = %e, "Fetch failed, retrying");
                }
                Err(e) => {
                    warn!(artifact = %target, attempts = attempt + 1, error = %e, "Fetch failed");
                    return Err(e);
                }
            }
            attempt += 1;
        }
    }

    async fn try_fetch(
        &self,
        target: &PackageTarget,
        storage: &dyn MirrorStorage,
    ) -> Result<PackageArtifact, MirrorError> {
        let descriptor = self.registry.download_descriptor(target).await?;

        let expected_name = target.filename();
        if !descriptor.filename.is_empty() && descriptor.filename != expected_name {
            warn!(
                artifact = %target,
                registry = descriptor.filename,
                canonical = expected_name,
                "Registry file name differs, storing under canonical name"
            );
        }

        let bytes =
            download_verified(self.registry.http(), &descriptor.download_url, &descriptor.shasum)
                .await?;
        debug!(artifact = %target, size = bytes.len(), "Downloaded and verified");

        storage.write_artifact(&bytes, target).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use reqwest::Client;
    use spiegel_schema::{ArtifactLocation, PackageIdentity, Platform};

    use super::*;
    use crate::storage::Verification;
    use crate::test_support::sha256_hex;

    /// Records every write; never touches disk.
    #[derive(Debug)]
    struct RecordingStorage {
        identity: PackageIdentity,
        writes: Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingStorage {
        fn new() -> Self {
            Self {
                identity: PackageIdentity::parse("hashicorp/aws").unwrap(),
                writes: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MirrorStorage for RecordingStorage {
        fn identity(&self) -> &PackageIdentity {
            &self.identity
        }

        async fn load_catalog(&self) -> Result<Vec<PackageArtifact>, MirrorError> {
            Ok(Vec::new())
        }

        async fn verify_catalog(
            &self,
            _catalog: Vec<PackageArtifact>,
        ) -> Result<Verification, MirrorError> {
            Ok(Verification::default())
        }

        async fn write_artifact(
            &self,
            bytes: &[u8],
            target: &PackageTarget,
        ) -> Result<PackageArtifact, MirrorError> {
            self.writes.lock().unwrap().push(bytes.to_vec());
            Ok(PackageArtifact {
                target: target.clone(),
                h1: "h1:recorded".into(),
                location: ArtifactLocation::Object(target.filename()),
                shadow: None,
            })
        }

        async fn commit(&self, _artifacts: &[PackageArtifact]) -> Result<(), MirrorError> {
            Ok(())
        }
    }

    fn target() -> PackageTarget {
        PackageTarget::new(
            PackageIdentity::parse("hashicorp/aws").unwrap(),
            "5.0.0",
            Platform::new("linux", "amd64"),
        )
    }

    fn no_wait(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_unit: Duration::ZERO,
        }
    }

    fn descriptor(server: &mockito::Server, shasum: &str) -> String {
        format!(
            r#"{{"filename":"terraform-provider-aws_5.0.0_linux_amd64.zip",
                "download_url":"{}/files/aws.zip","shasum":"{shasum}"}}"#,
            server.url()
        )
    }

    const DESCRIPTOR_PATH: &str = "/v1/providers/hashicorp/aws/5.0.0/download/linux/amd64";

    #[test]
    fn quadratic_backoff() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (1..5).map(|i| policy.delay_before(i).as_secs()).collect();
        assert_eq!(delays, vec![1, 4, 9, 16]);
    }

    #[tokio::test]
    async fn success_writes_verified_bytes() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", DESCRIPTOR_PATH)
            .with_status(200)
            .with_body(descriptor(&server, &sha256_hex(b"archive")))
            .create_async()
            .await;
        server
            .mock("GET", "/files/aws.zip")
            .with_status(200)
            .with_body("archive")
            .create_async()
            .await;

        let registry = RegistryClient::new(Client::new()).with_endpoint(server.url());
        let fetcher = Fetcher::new(registry, no_wait(5));
        let storage = RecordingStorage::new();

        let artifact = fetcher.fetch(&target(), &storage).await.unwrap();
        assert_eq!(artifact.target, target());
        assert_eq!(*storage.writes.lock().unwrap(), vec![b"archive".to_vec()]);
    }

    #[tokio::test]
    async fn checksum_mismatch_never_reaches_storage() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", DESCRIPTOR_PATH)
            .with_status(200)
            .with_body(descriptor(&server, &sha256_hex(b"expected")))
            .create_async()
            .await;
        let download = server
            .mock("GET", "/files/aws.zip")
            .with_status(200)
            .with_body("corrupted")
            .expect(3)
            .create_async()
            .await;

        let registry = RegistryClient::new(Client::new()).with_endpoint(server.url());
        let fetcher = Fetcher::new(registry, no_wait(3));
        let storage = RecordingStorage::new();

        let err = fetcher.fetch(&target(), &storage).await.unwrap_err();
        assert!(matches!(err, MirrorError::ChecksumMismatch { .. }));
        assert!(storage.writes.lock().unwrap().is_empty());
        download.assert_async().await;
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", DESCRIPTOR_PATH)
            .with_status(500)
            .expect(5)
            .create_async()
            .await;

        let registry = RegistryClient::new(Client::new()).with_endpoint(server.url());
        let fetcher = Fetcher::new(registry, no_wait(5));

        let err = fetcher
            .fetch(&target(), &RecordingStorage::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::Registry { .. }));
        mock.assert_async().await;
    }
}
