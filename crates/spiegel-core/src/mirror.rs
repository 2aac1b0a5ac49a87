//! Run orchestration.
//!
//! Per package: resolve, list upstream versions, load and verify the stored
//! catalog, reconcile, fetch, drop versions with failed platforms, commit.
//! A package that fails at any step is reported and the run moves on.

use futures::StreamExt;
use futures::stream;
use spiegel_schema::{PackageArtifact, PackageIdentity, PackageTarget};
use tracing::{Instrument, error, info, info_span, warn};

use crate::config::PackageSpec;
use crate::error::MirrorError;
use crate::fetch::Fetcher;
use crate::reconcile::{ReconcilePolicy, exclude_failed_versions};
use crate::registry::{RegistryClient, filter_wanted};
use crate::storage::{MirrorStorage, StorageFactory, Verification};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorOptions {
    /// Maximum in-flight fetches within one package.
    pub fetch_concurrency: usize,
    pub reconcile_policy: ReconcilePolicy,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            fetch_concurrency: 1,
            reconcile_policy: ReconcilePolicy::HealAll,
        }
    }
}

/// What happened to one configured package.
#[derive(Debug, Default)]
pub struct PackageOutcome {
    pub reference: String,
    pub identity: Option<PackageIdentity>,
    /// Targets selected from upstream.
    pub wanted: usize,
    /// Stored artifacts that verified and were kept as-is.
    pub reused: usize,
    pub fetched: usize,
    pub failed: Vec<PackageTarget>,
    /// Versions listed in the committed index.
    pub committed_versions: Vec<String>,
    /// Set when the package was abandoned before commit finished.
    pub error: Option<MirrorError>,
}

impl PackageOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub packages: Vec<PackageOutcome>,
}

impl RunReport {
    pub fn failed_packages(&self) -> usize {
        self.packages.iter().filter(|p| p.error.is_some()).count()
    }

    pub fn total_fetched(&self) -> usize {
        self.packages.iter().map(|p| p.fetched).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.packages.iter().all(PackageOutcome::is_success)
    }
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: RegistryClient,
    fetcher: Fetcher,
    storage: StorageFactory,
    options: MirrorOptions,
}

impl Orchestrator {
    pub fn new(
        registry: RegistryClient,
        fetcher: Fetcher,
        storage: StorageFactory,
        options: MirrorOptions,
    ) -> Self {
        Self {
            registry,
            fetcher,
            storage,
            options,
        }
    }

    /// Mirror every package in order. Never fails as a whole.
    pub async fn run(&self, packages: &[PackageSpec]) -> RunReport {
        let mut report = RunReport::default();

        for spec in packages {
            let span = info_span!("package", reference = %spec.reference);
            let outcome = self.mirror_package(spec).instrument(span).await;
            report.packages.push(outcome);
        }

        info!(
            packages = report.packages.len(),
            failed = report.failed_packages(),
            fetched = report.total_fetched(),
            "Mirror run finished"
        );
        report
    }

    pub async fn mirror_package(&self, spec: &PackageSpec) -> PackageOutcome {
        let mut outcome = PackageOutcome {
            reference: spec.reference.clone(),
            ..PackageOutcome::default()
        };

        if let Err(e) = self.mirror_inner(spec, &mut outcome).await {
            error!(error = %e, "Package mirroring failed");
            outcome.error = Some(e);
        }
        outcome
    }

    async fn mirror_inner(
        &self,
        spec: &PackageSpec,
        outcome: &mut PackageOutcome,
    ) -> Result<(), MirrorError> {
        let identity = self.registry.resolve_identity(&spec.reference)?;
        outcome.identity = Some(identity.clone());

        let constraint = spec.constraint()?;
        let metadata = self.registry.fetch_versions(&identity).await?;
        let wanted = filter_wanted(
            &identity,
            &metadata,
            &constraint,
            &spec.skipped_versions(),
            &spec.platforms(),
        );
        outcome.wanted = wanted.len();

        let storage = self.storage.for_package(identity);
        let (valid, to_fetch) = match load_and_verify(storage.as_ref()).await {
            Ok(Verification { valid, invalid }) => {
                let invalid = self.options.reconcile_policy.select_invalid(invalid, &wanted);
                let to_fetch = storage.reconcile(&valid, &invalid, &wanted);
                (valid, to_fetch)
            }
            Err(e) => {
                warn!(error = %e, "No usable catalog, mirroring from scratch");
                (Vec::new(), wanted.iter().cloned().collect())
            }
        };
        outcome.reused = valid.len();

        let mut to_fetch: Vec<PackageTarget> = to_fetch.into_iter().collect();
        to_fetch.sort();
        info!(
            wanted = outcome.wanted,
            reused = outcome.reused,
            fetching = to_fetch.len(),
            "Reconciled"
        );

        let (fetched, failed) = self.fetch_all(to_fetch, storage.as_ref()).await;
        outcome.fetched = fetched.len();

        let mut artifacts = valid;
        artifacts.extend(fetched);
        let artifacts = exclude_failed_versions(artifacts, &failed);
        if !failed.is_empty() {
            warn!(failed = failed.len(), "Versions with failed platforms are left out of the index");
        }
        outcome.failed = failed;

        storage.commit(&artifacts).await?;

        let mut versions: Vec<String> = artifacts.iter().map(|a| a.version().to_string()).collect();
        versions.sort();
        versions.dedup();
        outcome.committed_versions = versions;
        Ok(())
    }

    async fn fetch_all(
        &self,
        targets: Vec<PackageTarget>,
        storage: &dyn MirrorStorage,
    ) -> (Vec<PackageArtifact>, Vec<PackageTarget>) {
        let mut results = stream::iter(targets)
            .map(|target| async move {
                let result = self.fetcher.fetch(&target, storage).await;
                (target, result)
            })
            .buffer_unordered(self.options.fetch_concurrency.max(1));

        let mut fetched = Vec::new();
        let mut failed = Vec::new();
        while let Some((target, result)) = results.next().await {
            match result {
                Ok(artifact) => {
                    info!(artifact = %target, "Mirrored");
                    fetched.push(artifact);
                }
                Err(e) => {
                    error!(artifact = %target, error = %e, "Giving up on artifact");
                    failed.push(target);
                }
            }
        }
        (fetched, failed)
    }
}

async fn load_and_verify(storage: &dyn MirrorStorage) -> Result<Verification, MirrorError> {
    let catalog = storage.load_catalog().await?;
    storage.verify_catalog(catalog).await
}
