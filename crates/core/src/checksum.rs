//! Artifact checksums.
//!
//! Checksums are written as `<algorithm>:<hex>` (`sha256:…`, `sha512:…`).
//! Apache publishes SHA-512 sums for Maven, Gradle publishes SHA-256, so both
//! are accepted.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256, Sha512};
use std::path::Path;
use std::str::FromStr;
use tokio::io::AsyncReadExt;

use crate::error::IoResultExt;
use crate::{Error, Result};

/// Hash algorithm of a checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    /// SHA-256.
    Sha256,
    /// SHA-512.
    Sha512,
}

impl ChecksumAlgorithm {
    /// Length of the hex digest.
    #[must_use]
    pub const fn hex_len(self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }

    /// Start an incremental hash.
    #[must_use]
    pub fn hasher(self) -> ChecksumHasher {
        match self {
            Self::Sha256 => ChecksumHasher::Sha256(Sha256::new()),
            Self::Sha512 => ChecksumHasher::Sha512(Sha512::new()),
        }
    }
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sha256 => write!(f, "sha256"),
            Self::Sha512 => write!(f, "sha512"),
        }
    }
}

/// A content checksum.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum {
    algorithm: ChecksumAlgorithm,
    hex: String,
}

impl Checksum {
    /// The hash algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Lowercase hex digest.
    #[must_use]
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl FromStr for Checksum {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (algo, hex) = s.split_once(':').ok_or_else(|| {
            Error::validation(format!(
                "checksum '{s}' must be written as 'sha256:<hex>' or 'sha512:<hex>'"
            ))
        })?;

        let algorithm = match algo.to_lowercase().as_str() {
            "sha256" => ChecksumAlgorithm::Sha256,
            "sha512" => ChecksumAlgorithm::Sha512,
            other => {
                return Err(Error::validation(format!(
                    "unsupported checksum algorithm '{other}'"
                )));
            }
        };

        let hex = hex.trim().to_lowercase();
        if hex.len() != algorithm.hex_len() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::validation(format!(
                "{algorithm} checksum must be {} hex characters, got '{hex}'",
                algorithm.hex_len()
            )));
        }

        Ok(Self { algorithm, hex })
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Incremental hasher producing a [`Checksum`].
pub enum ChecksumHasher {
    /// SHA-256 state.
    Sha256(Sha256),
    /// SHA-512 state.
    Sha512(Sha512),
}

impl ChecksumHasher {
    /// Feed bytes into the hash.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    /// Finish hashing.
    #[must_use]
    pub fn finalize(self) -> Checksum {
        match self {
            Self::Sha256(h) => Checksum {
                algorithm: ChecksumAlgorithm::Sha256,
                hex: hex::encode(h.finalize()),
            },
            Self::Sha512(h) => Checksum {
                algorithm: ChecksumAlgorithm::Sha512,
                hex: hex::encode(h.finalize()),
            },
        }
    }
}

/// Compute the checksum of a file.
pub async fn file_checksum(path: &Path, algorithm: ChecksumAlgorithm) -> Result<Checksum> {
    let mut file = tokio::fs::File::open(path).await.with_path(path, "open")?;
    let mut hasher = algorithm.hasher();
    let mut buffer = vec![0u8; 8192];

    loop {
        let n = file.read(&mut buffer).await.with_path(path, "read")?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}
