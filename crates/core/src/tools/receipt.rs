//! Install receipts.
//!
//! Every managed install directory carries `.agentenv-receipt.json`
//! recording what was installed there. Re-provisioning compares the receipt
//! against the resolved tool to decide whether the install is a no-op.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::provider::{ResolvedTool, ToolSource};
use crate::error::IoResultExt;
use crate::{Error, Result};

/// Current receipt format version.
pub const RECEIPT_VERSION: u32 = 1;

/// Filename of the receipt inside an install directory.
pub const RECEIPT_FILE: &str = ".agentenv-receipt.json";

/// What was installed in a directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallReceipt {
    /// Receipt format version.
    pub format: u32,
    /// Tool name.
    pub name: String,
    /// Installed version.
    pub version: String,
    /// Checksum of the installed artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// URL the artifact came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

impl InstallReceipt {
    /// Build the receipt describing a resolved tool.
    #[must_use]
    pub fn for_resolved(resolved: &ResolvedTool) -> Self {
        let (checksum, source_url) = match &resolved.source {
            ToolSource::Url { url, checksum, .. } => {
                (Some(checksum.to_string()), Some(url.clone()))
            }
            ToolSource::System => (None, None),
        };
        Self {
            format: RECEIPT_VERSION,
            name: resolved.name.clone(),
            version: resolved.version.clone(),
            checksum,
            source_url,
        }
    }

    /// Whether this receipt records the given resolved tool.
    ///
    /// The source URL is not compared: a mirror serving the same checksum
    /// is the same install.
    #[must_use]
    pub fn matches(&self, resolved: &ResolvedTool) -> bool {
        let expected = Self::for_resolved(resolved);
        self.name == expected.name
            && self.version == expected.version
            && self.checksum == expected.checksum
    }

    /// Load the receipt from an install directory.
    ///
    /// Returns `None` if the directory has no receipt.
    pub fn load(install_dir: &Path) -> Result<Option<Self>> {
        let path = install_dir.join(RECEIPT_FILE);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path).with_path(&path, "read receipt")?;
        let receipt: Self = serde_json::from_str(&content).map_err(|e| {
            Error::configuration(format!(
                "Failed to parse install receipt {}: {e}",
                path.display()
            ))
        })?;

        if receipt.format > RECEIPT_VERSION {
            return Err(Error::configuration(format!(
                "Install receipt {} has format {}, newer than supported format {}",
                path.display(),
                receipt.format,
                RECEIPT_VERSION
            )));
        }

        Ok(Some(receipt))
    }

    /// Write the receipt into an install directory.
    pub fn save(&self, install_dir: &Path) -> Result<()> {
        let path = install_dir.join(RECEIPT_FILE);
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            Error::configuration(format!("Failed to serialize install receipt: {e}"))
        })?;
        std::fs::write(&path, content).with_path(&path, "write receipt")
    }
}
