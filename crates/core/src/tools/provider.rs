//! Tool provider trait for extensible tool installation.
//!
//! This module defines the `ToolProvider` trait that allows different sources
//! (URL archives, tools shipped by the base image) to be registered and used
//! uniformly for provisioning build tools.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::checksum::Checksum;
use crate::descriptor::{RequirementSource, ToolRequirement};
use crate::{Error, Result};

/// Placeholders accepted in URL templates.
pub const TEMPLATE_PLACEHOLDERS: &[&str] = &["name", "version", "os", "arch"];

/// Platform identifier combining OS and architecture.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    /// Operating system.
    pub os: Os,
    /// CPU architecture.
    pub arch: Arch,
}

impl Platform {
    /// Create a new platform.
    #[must_use]
    pub fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// Get the current platform.
    pub fn current() -> Result<Self> {
        Ok(Self {
            os: Os::current()?,
            arch: Arch::current()?,
        })
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

/// Operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    /// macOS.
    Darwin,
    /// Linux.
    Linux,
}

impl Os {
    /// Get the current OS.
    pub fn current() -> Result<Self> {
        Self::parse(std::env::consts::OS)
            .ok_or_else(|| Error::platform(format!("operating system '{}'", std::env::consts::OS)))
    }

    /// Parse from string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "darwin" | "macos" => Some(Self::Darwin),
            "linux" => Some(Self::Linux),
            _ => None,
        }
    }
}

impl std::fmt::Display for Os {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Darwin => write!(f, "darwin"),
            Self::Linux => write!(f, "linux"),
        }
    }
}

/// CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// 64-bit ARM.
    Arm64,
    /// 64-bit x86.
    X86_64,
}

impl Arch {
    /// Get the current architecture.
    pub fn current() -> Result<Self> {
        Self::parse(std::env::consts::ARCH).ok_or_else(|| {
            Error::platform(format!("architecture '{}'", std::env::consts::ARCH))
        })
    }

    /// Parse from string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "arm64" | "aarch64" => Some(Self::Arm64),
            "x86_64" | "amd64" | "x64" => Some(Self::X86_64),
            _ => None,
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Arm64 => write!(f, "arm64"),
            Self::X86_64 => write!(f, "x86_64"),
        }
    }
}

/// Archive format of a downloaded artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchiveKind {
    /// Gzip-compressed tarball.
    #[serde(rename = "tar.gz", alias = "tgz")]
    TarGz,
    /// Zip archive.
    #[serde(rename = "zip")]
    Zip,
}

impl ArchiveKind {
    /// Infer the archive kind from a URL or file name.
    #[must_use]
    pub fn from_url(url: &str) -> Option<Self> {
        let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
        if path.ends_with(".tar.gz") || path.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if path.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TarGz => write!(f, "tar.gz"),
            Self::Zip => write!(f, "zip"),
        }
    }
}

/// Source-specific resolution data.
///
/// This enum contains the provider-specific information needed to install a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolSource {
    /// Archive downloaded from a URL.
    Url {
        /// Fully expanded download URL.
        url: String,
        /// Expected checksum of the archive.
        checksum: Checksum,
        /// Archive format.
        archive: ArchiveKind,
        /// Leading path components to strip; `None` strips a single top-level directory.
        #[serde(skip_serializing_if = "Option::is_none")]
        strip_components: Option<usize>,
        /// Executable directory relative to the install path.
        bin_dir: String,
    },
    /// Tool provided by the base image.
    System,
}

impl ToolSource {
    /// Get the provider type name.
    #[must_use]
    pub const fn provider_type(&self) -> &'static str {
        match self {
            Self::Url { .. } => "url",
            Self::System => "system",
        }
    }
}

/// A resolved tool ready to be installed.
///
/// This represents a fully resolved tool requirement with all information
/// needed to download and install it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTool {
    /// Tool name (e.g., "maven", "gradle").
    pub name: String,
    /// Version string.
    pub version: String,
    /// Target platform.
    pub platform: Platform,
    /// Executables the tool provides.
    pub executables: Vec<String>,
    /// Variable pointing at the install path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_var: Option<String>,
    /// Explicit install directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_dir: Option<PathBuf>,
    /// Source-specific data.
    pub source: ToolSource,
}

/// A tool present in the environment.
///
/// Created once per requirement and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledTool {
    /// Tool name.
    pub name: String,
    /// Installed version.
    pub version: String,
    /// Install path (for system tools, the directory of the first executable).
    pub install_path: PathBuf,
    /// Directories to register on the execution path.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bin_dirs: Vec<PathBuf>,
    /// Executables the tool provides.
    pub executables: Vec<String>,
    /// Variable pointing at the install path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_var: Option<String>,
    /// Checksum of the installed artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Provider that produced this tool.
    pub provider: String,
    /// Whether this run installed the tool (false for no-op re-provisioning).
    #[serde(skip)]
    pub newly_installed: bool,
}

/// Options for tool operations.
#[derive(Debug, Clone)]
pub struct ToolOptions {
    /// Root directory for installed tools.
    pub install_root: PathBuf,
    /// Replace installs whose receipt does not match.
    pub force: bool,
    /// Base execution path used to find system tools.
    pub base_path: Option<String>,
}

impl Default for ToolOptions {
    fn default() -> Self {
        Self {
            install_root: PathBuf::from(crate::descriptor::DEFAULT_INSTALL_ROOT),
            force: false,
            base_path: None,
        }
    }
}

impl ToolOptions {
    /// Create new options with the default install root.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the install root.
    #[must_use]
    pub fn with_install_root(mut self, path: PathBuf) -> Self {
        self.install_root = path;
        self
    }

    /// Set force reinstall.
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Set the base execution path.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<String>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Base execution path, defaulting to the process `PATH`.
    #[must_use]
    pub fn base_path(&self) -> String {
        self.base_path
            .clone()
            .unwrap_or_else(crate::paths::default_base_path)
    }

    /// Deterministic install path of a resolved tool.
    #[must_use]
    pub fn install_path(&self, resolved: &ResolvedTool) -> PathBuf {
        resolved
            .install_dir
            .clone()
            .unwrap_or_else(|| self.install_root.join(&resolved.name))
    }
}

/// Request parameters for tool resolution.
pub struct ToolResolveRequest<'a> {
    /// The requirement from the descriptor.
    pub requirement: &'a ToolRequirement,
    /// Target platform.
    pub platform: &'a Platform,
}

/// Expand `{name}`, `{version}`, `{os}` and `{arch}` in a template.
#[must_use]
pub fn expand_template(template: &str, name: &str, version: &str, platform: &Platform) -> String {
    let os_str = match platform.os {
        Os::Darwin => "darwin",
        Os::Linux => "linux",
    };
    let arch_str = match platform.arch {
        Arch::Arm64 => "aarch64",
        Arch::X86_64 => "x86_64",
    };

    template
        .replace("{name}", name)
        .replace("{version}", version)
        .replace("{os}", os_str)
        .replace("{arch}", arch_str)
}

/// Resolve the bin directory of an install.
#[must_use]
pub fn bin_dir_of(install_path: &Path, bin_dir: &str) -> PathBuf {
    if bin_dir.is_empty() || bin_dir == "." {
        install_path.to_path_buf()
    } else {
        install_path.join(bin_dir)
    }
}

/// Trait for tool providers (URL archives, system tools).
///
/// Each provider implements this trait to handle resolution and installation
/// of tools from a specific source type. Providers are registered with
/// the `ToolRegistry` and selected based on the requirement's source.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Provider name (e.g., "url", "system").
    ///
    /// This matches the `source` field of a descriptor tool.
    fn name(&self) -> &'static str;

    /// Human-readable description, shown by `agentenv list`.
    fn description(&self) -> &'static str;

    /// Check if this provider handles the requirement's source.
    fn can_handle(&self, source: &RequirementSource) -> bool;

    /// Resolve a tool requirement to an installable artifact.
    ///
    /// Expands templates and parses checksums; performs no I/O.
    fn resolve(&self, request: &ToolResolveRequest<'_>) -> Result<ResolvedTool>;

    /// Install a resolved tool.
    ///
    /// If the tool is already installed with a matching receipt, returns the
    /// existing install without touching the network or the filesystem.
    async fn install(&self, resolved: &ResolvedTool, options: &ToolOptions)
    -> Result<InstalledTool>;

    /// Check if a tool is already installed.
    fn is_installed(&self, resolved: &ResolvedTool, options: &ToolOptions) -> bool;

    /// Check if provider prerequisites are available.
    ///
    /// Called before any install so that a missing prerequisite fails the
    /// run before the filesystem is touched.
    async fn check_prerequisites(&self) -> Result<()> {
        Ok(())
    }
}
