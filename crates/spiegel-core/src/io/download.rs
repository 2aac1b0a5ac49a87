//! Streaming download with SHA-256 verification.
//!
//! The archive is hashed while it streams in and is only handed back once the
//! digest matches, so unverified bytes never reach a storage backend.

use futures::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use spiegel_schema::Sha256Digest;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },
}

/// Download `url` fully into memory and check it against `expected`.
pub async fn download_verified(
    client: &Client,
    url: &str,
    expected: &Sha256Digest,
) -> Result<Vec<u8>, DownloadError> {
    let response = client
        .get(url)
        .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::Status {
            url: url.to_string(),
            status,
        });
    }

    let capacity = usize::try_from(response.content_length().unwrap_or(0)).unwrap_or(0);
    let mut body = Vec::with_capacity(capacity);
    let mut hasher = Sha256::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        hasher.update(&chunk);
        body.extend_from_slice(&chunk);
    }

    let actual = hex::encode(hasher.finalize());
    if !expected.matches(&actual) {
        return Err(DownloadError::HashMismatch {
            expected: expected.to_string(),
            actual,
        });
    }

    Ok(body)
}
