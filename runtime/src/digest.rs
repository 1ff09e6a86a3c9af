//! Content digests (`algorithm:hex`).

use std::fmt;
use std::path::Path;

use layerload_core::error::{LoadError, Result};
use sha2::{Digest as _, Sha256};

/// Algorithm used for every digest the loader produces.
pub const SHA256: &str = "sha256";

/// A validated content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: String,
    hex: String,
}

impl Digest {
    /// Parse `sha256:<hex>` or a bare hex string (assumed sha256).
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let (algorithm, hex) = value.split_once(':').unwrap_or((SHA256, value));

        let invalid = |reason: &str| LoadError::DigestError {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        if algorithm.is_empty()
            || !algorithm
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(invalid("bad algorithm"));
        }
        if hex.is_empty() || !hex.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')) {
            return Err(invalid("expected lowercase hex"));
        }
        if algorithm == SHA256 && hex.len() != 64 {
            return Err(invalid("sha256 digests have 64 hex characters"));
        }

        Ok(Self {
            algorithm: algorithm.to_string(),
            hex: hex.to_string(),
        })
    }

    /// Read a digest file written by the build step.
    pub fn read_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// SHA-256 of an in-memory buffer.
    pub fn sha256_of(bytes: &[u8]) -> Self {
        Self {
            algorithm: SHA256.to_string(),
            hex: hex::encode(Sha256::digest(bytes)),
        }
    }

    /// SHA-256 of a file, streamed.
    pub fn compute_file(path: &Path) -> Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)?;
        Ok(Self {
            algorithm: SHA256.to_string(),
            hex: hex::encode(hasher.finalize()),
        })
    }

    /// Digest of `blob`, from `digest_file` when it exists, else computed.
    pub fn for_blob(digest_file: &Path, blob: &Path) -> Result<Self> {
        if digest_file.is_file() {
            Self::read_file(digest_file)
        } else {
            tracing::debug!(
                blob = %blob.display(),
                "No digest file, hashing blob"
            );
            Self::compute_file(blob)
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}
