//! URL archive tool provider for agentenv.
//!
//! Installs tools shipped as `.tar.gz` or `.zip` archives:
//! - Template variables in URLs: `{name}`, `{version}`, `{os}`, `{arch}`
//! - Checksum verification while downloading (`sha256` / `sha512`)
//! - Staged extraction with an atomic rename into the install path
//!
//! Installs are idempotent: each install directory carries a receipt, and a
//! matching receipt turns the install into a no-op.

mod download;
mod extract;

pub use download::Downloader;

use agentenv_core::descriptor::RequirementSource;
use agentenv_core::tools::{
    ArchiveKind, InstallReceipt, InstalledTool, ResolvedTool, ToolOptions, ToolProvider,
    ToolResolveRequest, ToolSource, bin_dir_of, expand_template,
};
use agentenv_core::{Checksum, Error, IoResultExt, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Tool provider for archives fetched from a URL.
#[derive(Debug, Clone)]
pub struct UrlToolProvider {
    downloader: Downloader,
}

impl UrlToolProvider {
    /// Create a new URL tool provider.
    pub fn new() -> Result<Self> {
        Ok(Self {
            downloader: Downloader::new()?,
        })
    }

    fn installed(
        resolved: &ResolvedTool,
        install_path: PathBuf,
        bin_dir: &str,
        checksum: &Checksum,
        newly_installed: bool,
    ) -> InstalledTool {
        InstalledTool {
            name: resolved.name.clone(),
            version: resolved.version.clone(),
            bin_dirs: vec![bin_dir_of(&install_path, bin_dir)],
            install_path,
            executables: resolved.executables.clone(),
            home_var: resolved.home_var.clone(),
            checksum: Some(checksum.to_string()),
            provider: "url".to_string(),
            newly_installed,
        }
    }
}

fn missing_executables(bin: &Path, executables: &[String]) -> Vec<String> {
    executables
        .iter()
        .filter(|exe| !bin.join(exe).is_file())
        .cloned()
        .collect()
}

#[async_trait]
impl ToolProvider for UrlToolProvider {
    fn name(&self) -> &'static str {
        "url"
    }

    fn description(&self) -> &'static str {
        "Download and extract tool archives from a URL"
    }

    fn can_handle(&self, source: &RequirementSource) -> bool {
        matches!(source, RequirementSource::Url { .. })
    }

    fn resolve(&self, request: &ToolResolveRequest<'_>) -> Result<ResolvedTool> {
        let requirement = request.requirement;
        let RequirementSource::Url {
            url,
            checksum,
            archive,
            strip_components,
            bin_dir,
        } = &requirement.source
        else {
            return Err(Error::configuration(format!(
                "Tool '{}' is not a url source",
                requirement.name
            )));
        };

        let url = expand_template(url, &requirement.name, &requirement.version, request.platform);
        let checksum: Checksum = checksum.parse()?;
        let archive = archive
            .or_else(|| ArchiveKind::from_url(&url))
            .ok_or_else(|| {
                Error::configuration_with_help(
                    format!("Cannot infer archive format of {url}"),
                    "Set 'archive' to \"tar.gz\" or \"zip\"",
                )
            })?;

        debug!(tool = %requirement.name, %url, %archive, "Resolved url tool");

        Ok(ResolvedTool {
            name: requirement.name.clone(),
            version: requirement.version.clone(),
            platform: request.platform.clone(),
            executables: requirement.executables(),
            home_var: requirement.home_var.clone(),
            install_dir: requirement.install_dir.clone(),
            source: ToolSource::Url {
                url,
                checksum,
                archive,
                strip_components: *strip_components,
                bin_dir: bin_dir.clone(),
            },
        })
    }

    async fn install(
        &self,
        resolved: &ResolvedTool,
        options: &ToolOptions,
    ) -> Result<InstalledTool> {
        let ToolSource::Url {
            url,
            checksum,
            archive,
            strip_components,
            bin_dir,
        } = &resolved.source
        else {
            return Err(Error::configuration(
                "UrlToolProvider received non-url source",
            ));
        };

        let install_path = options.install_path(resolved);

        if install_path.exists() {
            match InstallReceipt::load(&install_path)? {
                Some(receipt) if receipt.matches(resolved) => {
                    let missing =
                        missing_executables(&bin_dir_of(&install_path, bin_dir), &resolved.executables);
                    if missing.is_empty() {
                        debug!(tool = %resolved.name, path = %install_path.display(), "Receipt matches");
                        return Ok(Self::installed(resolved, install_path, bin_dir, checksum, false));
                    }
                    if !options.force {
                        return Err(Error::configuration_with_help(
                            format!(
                                "Install of '{}' at {} is damaged: missing {}",
                                resolved.name,
                                install_path.display(),
                                missing.join(", ")
                            ),
                            "Rerun with --force to reinstall",
                        ));
                    }
                }
                Some(receipt) if !options.force => {
                    return Err(Error::configuration_with_help(
                        format!(
                            "{} holds {} {}, not the requested {}",
                            install_path.display(),
                            receipt.name,
                            receipt.version,
                            resolved.version
                        ),
                        "Rerun with --force to replace it",
                    ));
                }
                None if !options.force => {
                    return Err(Error::configuration_with_help(
                        format!(
                            "{} already exists and is not managed by agentenv",
                            install_path.display()
                        ),
                        "Remove it, set install_dir, or rerun with --force to replace it",
                    ));
                }
                _ => warn!(path = %install_path.display(), "Replacing existing install"),
            }
        }

        info!(tool = %resolved.name, version = %resolved.version, %url, "Downloading");

        // Dropped on every return path, removing the artifact.
        let download_dir = tempfile::Builder::new()
            .prefix("agentenv-download-")
            .tempdir()
            .map_err(|e| Error::io(e, &std::env::temp_dir(), "create download directory"))?;
        let artifact = download_dir.path().join(download::artifact_name(url));

        let actual = self
            .downloader
            .fetch(url, &artifact, checksum.algorithm())
            .await?;
        if actual != *checksum {
            return Err(Error::integrity(
                &resolved.name,
                checksum.to_string(),
                actual.to_string(),
            ));
        }
        debug!(tool = %resolved.name, %checksum, "Checksum verified");

        let parent = install_path.parent().ok_or_else(|| {
            Error::configuration(format!(
                "Install path {} has no parent directory",
                install_path.display()
            ))
        })?;
        std::fs::create_dir_all(parent).with_path(parent, "create install root")?;

        // Staged next to the install path so the final rename stays on one filesystem.
        let staging = tempfile::Builder::new()
            .prefix(".agentenv-staging-")
            .tempdir_in(parent)
            .map_err(|e| Error::io(e, parent, "create staging directory"))?;
        let content = staging.path().join("content");
        extract::extract(&artifact, *archive, strip_components.unwrap_or(0), &content)?;

        let root = match strip_components {
            Some(_) => content,
            None => extract::single_root(&content)?.unwrap_or(content),
        };

        let missing = missing_executables(&bin_dir_of(&root, bin_dir), &resolved.executables);
        if !missing.is_empty() {
            return Err(Error::configuration_with_help(
                format!(
                    "Archive for '{}' does not provide {} in '{bin_dir}'",
                    resolved.name,
                    missing.join(", ")
                ),
                "Check 'bin_dir', 'executables' and 'strip_components'",
            ));
        }

        InstallReceipt::for_resolved(resolved).save(&root)?;

        if install_path.exists() {
            std::fs::remove_dir_all(&install_path).with_path(&install_path, "remove old install")?;
        }
        std::fs::rename(&root, &install_path).with_path(&install_path, "move install into place")?;

        info!(
            tool = %resolved.name,
            version = %resolved.version,
            path = %install_path.display(),
            "Installed"
        );

        Ok(Self::installed(resolved, install_path, bin_dir, checksum, true))
    }

    fn is_installed(&self, resolved: &ResolvedTool, options: &ToolOptions) -> bool {
        InstallReceipt::load(&options.install_path(resolved))
            .ok()
            .flatten()
            .is_some_and(|receipt| receipt.matches(resolved))
    }
}
