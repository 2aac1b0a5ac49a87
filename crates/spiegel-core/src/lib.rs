//! spiegel core library.
//!
//! Keeps a local or object-store mirror of registry packages in sync with the
//! upstream registry. The moving parts:
//!
//! - [`registry`]: registry API client and wanted-set selection
//! - [`storage`]: the storage port with filesystem and object-store backends
//! - [`fetch`]: verified download with retry
//! - [`reconcile`]: what to fetch and what to publish
//! - [`mirror`]: the per-package pipeline tying it together

pub mod config;
pub mod constraint;
pub mod error;
pub mod fetch;
pub mod h1;
pub mod io;
pub mod mirror;
pub mod reconcile;
pub mod registry;
pub mod storage;

pub use config::{MirrorConfig, PackageSpec, StorageConfig};
pub use constraint::VersionConstraint;
pub use error::MirrorError;
pub use fetch::{Fetcher, RetryPolicy};
pub use mirror::{MirrorOptions, Orchestrator, PackageOutcome, RunReport};
pub use reconcile::ReconcilePolicy;
pub use registry::RegistryClient;
pub use storage::{MirrorStorage, StorageFactory};

/// User-Agent sent with every registry and download request.
pub const USER_AGENT: &str = concat!("spiegel/", env!("CARGO_PKG_VERSION"));
