use std::path::Path;

use anyhow::{Context, Result, bail};
use spiegel_core::{MirrorConfig, StorageConfig};
use spiegel_schema::PackageIdentity;

/// Load the configuration and print each package it selects.
///
/// Fails if the file is invalid or any package has a bad reference or range.
pub fn validate(config_path: &Path) -> Result<()> {
    let config = MirrorConfig::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    match &config.storage {
        StorageConfig::Filesystem { root } => println!("storage: fs {}", root.display()),
        StorageConfig::ObjectStore { bucket, prefix, .. } => {
            println!("storage: s3 bucket={bucket} prefix={prefix}");
        }
    }

    let mut problems = 0;
    for spec in &config.providers {
        let identity = match PackageIdentity::parse(&spec.reference) {
            Ok(identity) => identity,
            Err(e) => {
                eprintln!("{}: {e}", spec.reference);
                problems += 1;
                continue;
            }
        };
        let constraint = match spec.constraint() {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{identity}: {e}");
                problems += 1;
                continue;
            }
        };

        let platforms: Vec<String> = spec.platforms().iter().map(ToString::to_string).collect();
        println!(
            "{identity} versions={constraint} skip={} platforms={}",
            spec.skipped_versions().len(),
            platforms.join(",")
        );
    }

    if problems > 0 {
        bail!("{problems} package(s) have invalid settings");
    }
    println!("{} package(s) OK", config.providers.len());
    Ok(())
}
