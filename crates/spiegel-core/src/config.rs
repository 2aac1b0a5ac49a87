//! Mirror configuration file.
//!
//! The format is picked from the file extension: `.json`, `.toml`, anything
//! else is read as YAML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use semver::Version;
use serde::{Deserialize, Serialize};
use spiegel_schema::Platform;
use tracing::warn;

use crate::constraint::VersionConstraint;
use crate::error::MirrorError;
use crate::fetch::RetryPolicy;
use crate::reconcile::ReconcilePolicy;

/// One package to mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub reference: String,
    #[serde(default, alias = "versionRange")]
    pub version_range: Option<String>,
    #[serde(default)]
    pub skip_versions: Vec<String>,
    #[serde(default)]
    pub os_archs: Vec<Platform>,
}

impl PackageSpec {
    pub fn constraint(&self) -> Result<VersionConstraint, MirrorError> {
        match &self.version_range {
            Some(range) => VersionConstraint::parse(range),
            None => Ok(VersionConstraint::any()),
        }
    }

    /// Parsed skip list. Entries that are not valid semver are logged and dropped.
    pub fn skipped_versions(&self) -> Vec<Version> {
        self.skip_versions
            .iter()
            .filter_map(|raw| match Version::parse(raw.trim()) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(package = %self.reference, version = %raw, error = %e, "Ignoring unparseable skip version");
                    None
                }
            })
            .collect()
    }

    /// Requested platforms, or the host platform when none are configured.
    pub fn platforms(&self) -> Vec<Platform> {
        if self.os_archs.is_empty() {
            let host = Platform::host();
            warn!(package = %self.reference, platform = %host, "No os_archs configured, using host platform");
            return vec![host];
        }
        self.os_archs.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    Filesystem {
        root: PathBuf,
    },
    ObjectStore {
        bucket: String,
        prefix: String,
        endpoint: Option<String>,
        region: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff_unit_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            backoff_unit_secs: policy.backoff_unit.as_secs(),
        }
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            backoff_unit: Duration::from_secs(settings.backoff_unit_secs),
        }
    }
}

/// Validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorConfig {
    pub providers: Vec<PackageSpec>,
    pub storage: StorageConfig,
    pub fetch_concurrency: usize,
    pub reconcile_policy: ReconcilePolicy,
    pub registry_endpoint: Option<String>,
    pub retry: RetrySettings,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    providers: Vec<PackageSpec>,
    #[serde(default)]
    storage_type: String,
    #[serde(default)]
    fs_config: Option<RawFsConfig>,
    #[serde(default)]
    s3_config: Option<RawS3Config>,
    #[serde(default)]
    fetch_concurrency: Option<usize>,
    #[serde(default)]
    heal_out_of_scope: Option<bool>,
    #[serde(default)]
    registry_endpoint: Option<String>,
    #[serde(default)]
    retry: RetrySettings,
}

#[derive(Debug, Deserialize)]
struct RawFsConfig {
    #[serde(default)]
    download_root: String,
}

#[derive(Debug, Deserialize)]
struct RawS3Config {
    #[serde(default)]
    bucket: String,
    #[serde(default)]
    prefix: String,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    region: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("json") => Self::Json,
            Some("toml") => Self::Toml,
            _ => Self::Yaml,
        }
    }
}

impl MirrorConfig {
    pub fn load(path: &Path) -> Result<Self, MirrorError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MirrorError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&content, ConfigFormat::from_path(path))
    }

    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self, MirrorError> {
        let raw: RawConfig = match format {
            ConfigFormat::Yaml => serde_yaml_ng::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        }
        .map_err(|e| MirrorError::Config(format!("invalid configuration: {e}")))?;

        raw.validate()
    }
}

impl RawConfig {
    fn validate(self) -> Result<MirrorConfig, MirrorError> {
        let storage = match self.storage_type.to_ascii_lowercase().as_str() {
            "fs" => {
                let root = self
                    .fs_config
                    .map(|fs| fs.download_root)
                    .filter(|root| !root.trim().is_empty())
                    .ok_or_else(|| {
                        MirrorError::Config("fs storage requires fs_config.download_root".into())
                    })?;
                StorageConfig::Filesystem {
                    root: PathBuf::from(root),
                }
            }
            "s3" => {
                let s3 = self
                    .s3_config
                    .filter(|s3| !s3.bucket.trim().is_empty())
                    .ok_or_else(|| {
                        MirrorError::Config("s3 storage requires s3_config.bucket".into())
                    })?;
                StorageConfig::ObjectStore {
                    bucket: s3.bucket,
                    prefix: s3.prefix,
                    endpoint: s3.endpoint.filter(|e| !e.is_empty()),
                    region: s3.region.filter(|r| !r.is_empty()),
                }
            }
            other => {
                return Err(MirrorError::Config(format!(
                    "unknown storage_type '{other}' (expected fs or s3)"
                )));
            }
        };

        let fetch_concurrency = match self.fetch_concurrency {
            Some(0) => {
                return Err(MirrorError::Config(
                    "fetch_concurrency must be at least 1".into(),
                ));
            }
            Some(n) => n,
            None => 1,
        };

        let reconcile_policy = if self.heal_out_of_scope.unwrap_or(true) {
            ReconcilePolicy::HealAll
        } else {
            ReconcilePolicy::WantedOnly
        };

        Ok(MirrorConfig {
            providers: self.providers,
            storage,
            fetch_concurrency,
            reconcile_policy,
            registry_endpoint: self.registry_endpoint.filter(|e| !e.is_empty()),
            retry: self.retry,
        })
    }
}
