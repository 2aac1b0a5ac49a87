//! Digest newtypes.

use serde::{Deserialize, Deserializer, Serialize};

/// Error returned when a string is not a valid SHA-256 hex digest.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid SHA256 digest '{input}': {reason}")]
pub struct DigestError {
    /// The rejected input.
    pub input: String,
    /// Why it was rejected.
    pub reason: &'static str,
}

/// A validated SHA-256 digest (64 hex characters, stored lowercase).
///
/// Registry download descriptors carry this as `shasum`; it is validated at
/// deserialization so a malformed descriptor never reaches the verifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Create a new `Sha256Digest`, validating the input.
    ///
    /// Accepts strings with or without a `sha256:` prefix, in either case.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError`] if the hex portion is not exactly 64 ASCII hex
    /// characters.
    pub fn new(s: impl Into<String>) -> Result<Self, DigestError> {
        let s = s.into();
        let hex = s.strip_prefix("sha256:").unwrap_or(&s);

        if hex.len() != 64 {
            return Err(DigestError {
                input: s,
                reason: "expected 64 hex characters",
            });
        }
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DigestError {
                input: s,
                reason: "contains non-hex characters",
            });
        }

        Ok(Self(hex.to_ascii_lowercase()))
    }

    /// Get the digest as a lowercase hex string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against another hex digest, ignoring ASCII case.
    pub fn matches(&self, other_hex: &str) -> bool {
        self.0.eq_ignore_ascii_case(other_hex)
    }
}

impl<'de> Deserialize<'de> for Sha256Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Sha256Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Structural zip hash in `h1:<base64>` form.
///
/// Independent of archive metadata and entry order; two archives with the
/// same entry names and contents share an H1 even if their bytes differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct H1Checksum(String);

impl H1Checksum {
    /// Wrap a recorded H1 value without validation (catalog data).
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Return the `h1:...` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this value carries the `h1:` scheme prefix.
    pub fn is_h1(&self) -> bool {
        self.0.starts_with("h1:")
    }
}

impl std::fmt::Display for H1Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for H1Checksum {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for H1Checksum {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
