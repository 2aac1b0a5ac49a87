use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use spiegel_core::{
    Fetcher, MirrorConfig, MirrorOptions, Orchestrator, RegistryClient, RetryPolicy, RunReport,
    StorageFactory,
};
use tracing::{info, warn};

/// Build the pipeline from `config_path` and run one pass, or keep running
/// passes when `looping`. Only configuration problems produce an error.
pub async fn mirror(config_path: &Path, looping: bool, wait_secs: u64) -> Result<()> {
    let config = MirrorConfig::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let orchestrator = build_orchestrator(&config).await?;
    let wait = Duration::from_secs(wait_secs);

    loop {
        tokio::select! {
            report = orchestrator.run(&config.providers) => summarize(&report),
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping mid-pass");
                return Ok(());
            }
        }

        if !looping {
            return Ok(());
        }

        info!(wait_secs, "Sleeping until next pass");
        tokio::select! {
            () = tokio::time::sleep(wait) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, exiting loop");
                return Ok(());
            }
        }
    }
}

pub async fn build_orchestrator(config: &MirrorConfig) -> Result<Orchestrator> {
    let mut registry = RegistryClient::with_defaults()?;
    if let Some(endpoint) = &config.registry_endpoint {
        registry = registry.with_endpoint(endpoint.clone());
    }

    let storage = StorageFactory::from_config(&config.storage).await?;
    let fetcher = Fetcher::new(registry.clone(), RetryPolicy::from(config.retry));
    let options = MirrorOptions {
        fetch_concurrency: config.fetch_concurrency,
        reconcile_policy: config.reconcile_policy,
    };

    Ok(Orchestrator::new(registry, fetcher, storage, options))
}

fn summarize(report: &RunReport) {
    for outcome in &report.packages {
        match &outcome.error {
            Some(e) => warn!(reference = %outcome.reference, error = %e, "Package failed"),
            None if !outcome.failed.is_empty() => warn!(
                reference = %outcome.reference,
                fetched = outcome.fetched,
                failed = outcome.failed.len(),
                versions = ?outcome.committed_versions,
                "Package partially mirrored"
            ),
            None => info!(
                reference = %outcome.reference,
                fetched = outcome.fetched,
                reused = outcome.reused,
                versions = outcome.committed_versions.len(),
                "Package mirrored"
            ),
        }
    }

    info!(
        packages = report.packages.len(),
        failed = report.failed_packages(),
        fetched = report.total_fetched(),
        clean = report.is_clean(),
        "Pass complete"
    );
}
