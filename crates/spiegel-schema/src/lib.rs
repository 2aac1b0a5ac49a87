//! Shared types and wire format for spiegel.
//!
//! Everything here is plain data: package identities and targets, the
//! persisted mirror catalog (`index.json`, `<version>.json`, `.etag-map.json`)
//! and the registry's JSON responses. No I/O happens in this crate.

pub mod catalog;
pub mod hash;
pub mod identity;
pub mod registry;

// Re-exports
pub use catalog::{ArchiveEntry, MirrorIndex, ObjectChecksum, ShadowRecord, VersionManifest};
pub use hash::{H1Checksum, Sha256Digest};
pub use identity::{
    ArtifactLocation, PackageArtifact, PackageIdentity, PackageTarget, Platform, ReferenceError,
};
pub use registry::{DownloadDescriptor, ProviderVersion, ProviderVersions};

/// Registry host used when a reference omits the hostname.
pub const DEFAULT_HOSTNAME: &str = "registry.terraform.io";

/// Namespace used when a reference omits the owner.
pub const DEFAULT_OWNER: &str = "hashicorp";

/// File name of the per-package mirror index.
pub const INDEX_FILE: &str = "index.json";

/// File name of the object-store shadow record (filename -> ETag/H1).
pub const SHADOW_RECORD_FILE: &str = ".etag-map.json";
