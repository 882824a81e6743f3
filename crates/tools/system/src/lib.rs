//! Base-image tool provider for agentenv.
//!
//! Tools such as the JDK and git ship with the base image. This provider
//! installs nothing: it locates each executable on the base execution path
//! and records where it was found.

use agentenv_core::descriptor::RequirementSource;
use agentenv_core::tools::{
    InstalledTool, ResolvedTool, ToolOptions, ToolProvider, ToolResolveRequest, ToolSource,
};
use agentenv_core::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

/// Tool provider for tools already present in the base image.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemToolProvider;

impl SystemToolProvider {
    /// Create a new system tool provider.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Locate an executable on the base execution path.
    pub fn locate(&self, executable: &str, options: &ToolOptions) -> Result<PathBuf> {
        let base_path = options.base_path();
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        which::which_in(executable, Some(&base_path), cwd).map_err(|_| {
            Error::configuration_with_help(
                format!("'{executable}' was not found on the base execution path"),
                format!("The base image must provide it; searched {base_path}"),
            )
        })
    }
}

#[async_trait]
impl ToolProvider for SystemToolProvider {
    fn name(&self) -> &'static str {
        "system"
    }

    fn description(&self) -> &'static str {
        "Use tools provided by the base image"
    }

    fn can_handle(&self, source: &RequirementSource) -> bool {
        matches!(source, RequirementSource::System)
    }

    fn resolve(&self, request: &ToolResolveRequest<'_>) -> Result<ResolvedTool> {
        let requirement = request.requirement;
        if !matches!(requirement.source, RequirementSource::System) {
            return Err(Error::configuration(format!(
                "Tool '{}' is not a system source",
                requirement.name
            )));
        }

        Ok(ResolvedTool {
            name: requirement.name.clone(),
            version: requirement.version.clone(),
            platform: request.platform.clone(),
            executables: requirement.executables(),
            home_var: requirement.home_var.clone(),
            install_dir: requirement.install_dir.clone(),
            source: ToolSource::System,
        })
    }

    async fn install(
        &self,
        resolved: &ResolvedTool,
        options: &ToolOptions,
    ) -> Result<InstalledTool> {
        let mut found = Vec::with_capacity(resolved.executables.len());
        for exe in &resolved.executables {
            found.push(self.locate(exe, options).map_err(|e| match e {
                Error::Configuration { message, help } => Error::Configuration {
                    message: format!("Tool '{}': {message}", resolved.name),
                    help,
                },
                other => other,
            })?);
        }

        let install_path = match &resolved.install_dir {
            Some(dir) => dir.clone(),
            None => found
                .first()
                .and_then(|p| p.parent())
                .map(PathBuf::from)
                .ok_or_else(|| {
                    Error::configuration(format!("Tool '{}' declares no executables", resolved.name))
                })?,
        };

        debug!(tool = %resolved.name, path = %install_path.display(), ?found, "Found system tool");

        Ok(InstalledTool {
            name: resolved.name.clone(),
            version: resolved.version.clone(),
            install_path,
            bin_dirs: Vec::new(),
            executables: resolved.executables.clone(),
            home_var: resolved.home_var.clone(),
            checksum: None,
            provider: "system".to_string(),
            newly_installed: false,
        })
    }

    fn is_installed(&self, resolved: &ResolvedTool, options: &ToolOptions) -> bool {
        resolved
            .executables
            .iter()
            .all(|exe| self.locate(exe, options).is_ok())
    }
}
