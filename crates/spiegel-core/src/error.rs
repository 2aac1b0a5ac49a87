//! Error kinds for mirroring operations.

use spiegel_schema::ReferenceError;
use thiserror::Error;

use crate::h1::H1Error;
use crate::io::blob::BlobError;
use crate::io::download::DownloadError;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum MirrorError {
    /// Malformed package reference. Fatal for that package only.
    #[error("invalid package reference: {0}")]
    ReferenceParse(#[from] ReferenceError),

    /// Non-2xx, transport failure or malformed body from the registry.
    #[error("registry error: {message}")]
    Registry {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Downloaded bytes do not hash to the registry-declared digest.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Read/write/list failure on a storage backend.
    #[error("storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Invalid version range syntax. Fatal for that package only.
    #[error("invalid version constraint '{constraint}': {reason}")]
    ConstraintParse { constraint: String, reason: String },

    /// Bad configuration file or unknown storage type.
    #[error("configuration error: {0}")]
    Config(String),
}

impl MirrorError {
    pub fn registry(message: impl Into<String>) -> Self {
        Self::Registry {
            message: message.into(),
            source: None,
        }
    }

    pub fn registry_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Registry {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether the fetcher may try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Registry { .. } | Self::ChecksumMismatch { .. } | Self::Storage { .. }
        )
    }
}

impl From<DownloadError> for MirrorError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::HashMismatch { expected, actual } => {
                Self::ChecksumMismatch { expected, actual }
            }
            DownloadError::Status { url, status } => {
                Self::registry(format!("HTTP {status} downloading {url}"))
            }
            DownloadError::Http(e) => Self::registry_with("download failed", e),
        }
    }
}

impl From<H1Error> for MirrorError {
    fn from(err: H1Error) -> Self {
        Self::storage_with("computing h1 checksum", err)
    }
}

impl From<BlobError> for MirrorError {
    fn from(err: BlobError) -> Self {
        Self::storage_with("object store request failed", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(MirrorError::registry("x").is_retryable());
        assert!(MirrorError::storage("x").is_retryable());
        assert!(
            MirrorError::ChecksumMismatch {
                expected: "a".into(),
                actual: "b".into()
            }
            .is_retryable()
        );
        assert!(!MirrorError::Config("x".into()).is_retryable());
        assert!(!MirrorError::from(ReferenceError::Empty).is_retryable());
    }

    #[test]
    fn hash_mismatch_maps_to_checksum_error() {
        let err: MirrorError = DownloadError::HashMismatch {
            expected: "aa".into(),
            actual: "bb".into(),
        }
        .into();
        assert!(matches!(err, MirrorError::ChecksumMismatch { .. }));
        assert_eq!(err.to_string(), "checksum mismatch: expected aa, got bb");
    }
}
