//! Package identities, fetchable targets and stored artifacts.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::catalog::ObjectChecksum;
use crate::hash::H1Checksum;
use crate::{DEFAULT_HOSTNAME, DEFAULT_OWNER};

/// Errors produced while parsing a package reference string.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    /// The reference was empty or only whitespace.
    #[error("empty package reference")]
    Empty,

    /// One of the slash-delimited segments was empty (e.g. `hashicorp//aws`).
    #[error("package reference '{0}' contains an empty segment")]
    EmptySegment(String),
}

/// The registry-qualified identity of a package family.
///
/// # Example
///
/// ```
/// use spiegel_schema::PackageIdentity;
///
/// let id = PackageIdentity::parse("gavinbunney/kubectl").unwrap();
/// assert_eq!(id.hostname, "registry.terraform.io");
/// assert_eq!(id.owner, "gavinbunney");
/// assert_eq!(id.name, "kubectl");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageIdentity {
    /// Registry host, e.g. `registry.terraform.io`.
    pub hostname: String,
    /// Namespace within the registry, e.g. `hashicorp`.
    pub owner: String,
    /// Package name, e.g. `aws`. May contain `/` for deep references.
    pub name: String,
}

impl PackageIdentity {
    /// Create an identity from its three parts.
    pub fn new(
        hostname: impl Into<String>,
        owner: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse a slash-delimited reference.
    ///
    /// One segment is a name, two are `owner/name`, three or more are
    /// `hostname/owner/name...` where the trailing segments are re-joined
    /// into the name.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError`] if the reference is empty or has an empty
    /// segment.
    pub fn parse(reference: &str) -> Result<Self, ReferenceError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ReferenceError::Empty);
        }

        let segments: Vec<&str> = reference.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(ReferenceError::EmptySegment(reference.to_string()));
        }

        let identity = match segments.as_slice() {
            [name] => Self::new(DEFAULT_HOSTNAME, DEFAULT_OWNER, *name),
            [owner, name] => Self::new(DEFAULT_HOSTNAME, *owner, *name),
            [hostname, owner, rest @ ..] => Self::new(*hostname, *owner, rest.join("/")),
            [] => return Err(ReferenceError::Empty),
        };
        Ok(identity)
    }

    /// Relative storage path of this package: `{hostname}/{owner}/{name}`.
    pub fn base_path(&self) -> String {
        format!("{}/{}/{}", self.hostname, self.owner, self.name)
    }
}

impl FromStr for PackageIdentity {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_path())
    }
}

/// An operating system / architecture pair in registry naming (`linux`, `amd64`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Platform {
    /// Operating system, e.g. `linux`, `darwin`, `windows`.
    pub os: String,
    /// CPU architecture, e.g. `amd64`, `arm64`.
    pub arch: String,
}

impl Platform {
    /// Create a platform from its parts.
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// The manifest key for this platform: `{os}_{arch}`.
    pub fn key(&self) -> String {
        format!("{}_{}", self.os, self.arch)
    }

    /// Split a manifest key back into a platform.
    ///
    /// Returns `None` when the key has no `_` separator or either side is empty.
    pub fn from_key(key: &str) -> Option<Self> {
        let (os, arch) = key.split_once('_')?;
        if os.is_empty() || arch.is_empty() {
            return None;
        }
        Some(Self::new(os, arch))
    }

    /// The platform this binary runs on, translated to registry naming.
    pub fn host() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            other => other,
        };
        Self::new(os, arch)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.os, self.arch)
    }
}

/// One fetchable artifact: identity + version + platform.
///
/// This is the unit of "wanted", "valid" and "invalid" set membership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageTarget {
    /// The package family.
    pub identity: PackageIdentity,
    /// Normalized semantic version string.
    pub version: String,
    /// Operating system and architecture.
    pub platform: Platform,
}

impl PackageTarget {
    /// Create a target.
    pub fn new(identity: PackageIdentity, version: impl Into<String>, platform: Platform) -> Self {
        Self {
            identity,
            version: version.into(),
            platform,
        }
    }

    /// Canonical archive file name:
    /// `terraform-provider-{name}_{version}_{os}_{arch}.zip`.
    ///
    /// # Example
    ///
    /// ```
    /// use spiegel_schema::{PackageIdentity, PackageTarget, Platform};
    ///
    /// let target = PackageTarget::new(
    ///     PackageIdentity::parse("aws").unwrap(),
    ///     "5.0.0",
    ///     Platform::new("linux", "amd64"),
    /// );
    /// assert_eq!(target.filename(), "terraform-provider-aws_5.0.0_linux_amd64.zip");
    /// ```
    pub fn filename(&self) -> String {
        format!(
            "terraform-provider-{}_{}_{}_{}.zip",
            self.identity.name, self.version, self.platform.os, self.platform.arch
        )
    }
}

impl fmt::Display for PackageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.identity, self.version, self.platform)
    }
}

/// Where a stored artifact lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArtifactLocation {
    /// Absolute or root-relative path on the local filesystem.
    File(PathBuf),
    /// Object key within the configured bucket.
    Object(String),
}

impl fmt::Display for ArtifactLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Object(key) => f.write_str(key),
        }
    }
}

/// A target that exists in storage, with its recorded checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageArtifact {
    /// What this artifact is.
    pub target: PackageTarget,
    /// Structural zip hash recorded in the manifest.
    pub h1: H1Checksum,
    /// Storage path or key.
    pub location: ArtifactLocation,
    /// Object-store verification token recorded at write time, if any.
    pub shadow: Option<ObjectChecksum>,
}

impl PackageArtifact {
    /// Canonical file name of the underlying archive.
    pub fn filename(&self) -> String {
        self.target.filename()
    }

    /// Version string of the underlying target.
    pub fn version(&self) -> &str {
        &self.target.version
    }
}
