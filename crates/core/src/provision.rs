//! Provisioning: turning descriptor requirements into installed tools.

use std::sync::Arc;
use tracing::{info, instrument};

use crate::descriptor::{Descriptor, ToolRequirement};
use crate::tools::{
    InstalledTool, Platform, ResolvedTool, ToolOptions, ToolProvider, ToolRegistry,
    ToolResolveRequest,
};
use crate::{Error, Result};

/// Install state of a requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    /// Present and matching the requirement.
    Installed,
    /// Not present.
    Missing,
}

impl std::fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Installed => write!(f, "installed"),
            Self::Missing => write!(f, "missing"),
        }
    }
}

/// Installs descriptor requirements through registered providers.
#[derive(Debug)]
pub struct Provisioner {
    registry: ToolRegistry,
    options: ToolOptions,
    platform: Platform,
}

impl Provisioner {
    /// Create a provisioner for the current platform.
    pub fn new(registry: ToolRegistry, options: ToolOptions) -> Result<Self> {
        Ok(Self {
            registry,
            options,
            platform: Platform::current()?,
        })
    }

    /// Override the target platform.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Tool options in effect.
    #[must_use]
    pub fn options(&self) -> &ToolOptions {
        &self.options
    }

    /// Target platform.
    #[must_use]
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Provider handling a requirement's source.
    pub fn provider_for(&self, requirement: &ToolRequirement) -> Result<&Arc<dyn ToolProvider>> {
        self.registry
            .find_for_source(&requirement.source)
            .ok_or_else(|| {
                let help = if self.registry.is_empty() {
                    "No providers are registered".to_string()
                } else {
                    format!("Available providers: {}", self.registry.names().join(", "))
                };
                Error::configuration_with_help(
                    format!(
                        "No provider for source '{}' (tool '{}')",
                        requirement.source.provider_type(),
                        requirement.name
                    ),
                    help,
                )
            })
    }

    /// Resolve a requirement without installing it.
    pub fn resolve(
        &self,
        requirement: &ToolRequirement,
    ) -> Result<(&Arc<dyn ToolProvider>, ResolvedTool)> {
        requirement.scheme.validate(&requirement.version)?;
        let provider = self.provider_for(requirement)?;
        let resolved = provider.resolve(&ToolResolveRequest {
            requirement,
            platform: &self.platform,
        })?;
        Ok((provider, resolved))
    }

    /// Check prerequisites of every provider the requirements use.
    pub async fn check_prerequisites(&self, requirements: &[ToolRequirement]) -> Result<()> {
        let mut checked: Vec<&str> = Vec::new();
        for requirement in requirements {
            let provider = self.provider_for(requirement)?;
            if !checked.contains(&provider.name()) {
                provider.check_prerequisites().await?;
                checked.push(provider.name());
            }
        }
        Ok(())
    }

    /// Install state of a requirement.
    pub fn status(&self, requirement: &ToolRequirement) -> Result<ToolStatus> {
        let (provider, resolved) = self.resolve(requirement)?;
        Ok(if provider.is_installed(&resolved, &self.options) {
            ToolStatus::Installed
        } else {
            ToolStatus::Missing
        })
    }

    /// Provision a single requirement.
    #[instrument(name = "provision_tool", skip_all, fields(tool = %requirement.name, version = %requirement.version))]
    pub async fn provision_tool(&self, requirement: &ToolRequirement) -> Result<InstalledTool> {
        let (provider, resolved) = self.resolve(requirement)?;
        let installed = provider.install(&resolved, &self.options).await?;
        if installed.newly_installed {
            info!(path = %installed.install_path.display(), "Installed");
        } else {
            info!(path = %installed.install_path.display(), "Already installed");
        }
        Ok(installed)
    }

    /// Provision every requirement in declaration order.
    ///
    /// Stops at the first failure; tools installed before it stay installed
    /// and are reused on the next run.
    pub async fn provision(&self, descriptor: &Descriptor) -> Result<Vec<InstalledTool>> {
        self.check_prerequisites(&descriptor.tools).await?;

        let mut installed = Vec::with_capacity(descriptor.tools.len());
        for requirement in &descriptor.tools {
            installed.push(self.provision_tool(requirement).await?);
        }
        Ok(installed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::RequirementSource;
    use crate::tools::{Arch, Os, ToolSource};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Provider that records installs and fails for one tool name.
    struct RecordingProvider {
        installs: Arc<Mutex<Vec<String>>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl ToolProvider for RecordingProvider {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn description(&self) -> &'static str {
            "Recording provider"
        }

        fn can_handle(&self, source: &RequirementSource) -> bool {
            matches!(source, RequirementSource::System)
        }

        fn resolve(&self, request: &ToolResolveRequest<'_>) -> Result<ResolvedTool> {
            Ok(ResolvedTool {
                name: request.requirement.name.clone(),
                version: request.requirement.version.clone(),
                platform: request.platform.clone(),
                executables: request.requirement.executables(),
                home_var: None,
                install_dir: None,
                source: ToolSource::System,
            })
        }

        async fn install(
            &self,
            resolved: &ResolvedTool,
            _options: &ToolOptions,
        ) -> Result<InstalledTool> {
            if self.fail_on == Some(resolved.name.as_str()) {
                return Err(Error::network("file:///nowhere", "unreachable"));
            }
            self.installs.lock().unwrap().push(resolved.name.clone());
            Ok(InstalledTool {
                name: resolved.name.clone(),
                version: resolved.version.clone(),
                install_path: PathBuf::from("/usr/bin"),
                bin_dirs: Vec::new(),
                executables: resolved.executables.clone(),
                home_var: None,
                checksum: None,
                provider: "system".into(),
                newly_installed: false,
            })
        }

        fn is_installed(&self, resolved: &ResolvedTool, _options: &ToolOptions) -> bool {
            resolved.name == "git"
        }
    }

    fn provisioner(fail_on: Option<&'static str>) -> (Provisioner, Arc<Mutex<Vec<String>>>) {
        let installs = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ToolRegistry::new();
        registry.register(RecordingProvider {
            installs: installs.clone(),
            fail_on,
        });
        let p = Provisioner::new(registry, ToolOptions::new())
            .unwrap()
            .with_platform(Platform::new(Os::Linux, Arch::X86_64));
        (p, installs)
    }

    fn descriptor() -> Descriptor {
        Descriptor::parse(
            r#"
[[tools]]
name = "git"
version = "*"
source = "system"

[[tools]]
name = "java"
version = "17"
scheme = "jdk"
source = "system"

[[tools]]
name = "make"
version = "*"
source = "system"
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_provision_in_declaration_order() {
        let (p, installs) = provisioner(None);
        let installed = p.provision(&descriptor()).await.unwrap();
        assert_eq!(installed.len(), 3);
        assert_eq!(*installs.lock().unwrap(), vec!["git", "java", "make"]);
    }

    #[tokio::test]
    async fn test_provision_fails_fast() {
        let (p, installs) = provisioner(Some("java"));
        let err = p.provision(&descriptor()).await.unwrap_err();
        assert_eq!(err.kind(), "network");
        assert_eq!(*installs.lock().unwrap(), vec!["git"]);
    }

    #[tokio::test]
    async fn test_missing_provider() {
        let p = Provisioner::new(ToolRegistry::new(), ToolOptions::new()).unwrap();
        let err = p.provision(&descriptor()).await.unwrap_err();
        assert_eq!(err.kind(), "configuration");
        assert!(err.to_string().contains("No provider for source 'system'"));
    }

    #[test]
    fn test_provider_selected_by_source() {
        let (p, _) = provisioner(None);
        let d = descriptor();
        let provider = p.provider_for(&d.tools[0]).unwrap();
        assert_eq!(provider.name(), "recording");
        assert_eq!(provider.description(), "Recording provider");

        let url = Descriptor::parse(&format!(
            "[[tools]]\nname = \"maven\"\nversion = \"3.9.6\"\nsource = \"url\"\nurl = \"file:///m.tar.gz\"\nchecksum = \"sha256:{}\"\n",
            "a".repeat(64)
        ))
        .unwrap();
        let Err(err) = p.provider_for(&url.tools[0]) else {
            panic!("url source has no provider");
        };
        assert!(err.to_string().contains("No provider for source 'url' (tool 'maven')"));
    }

    #[tokio::test]
    async fn test_invalid_version_rejected_before_install() {
        let (p, installs) = provisioner(None);
        let mut d = descriptor();
        d.tools[1].version = "seventeen".into();
        let err = p.provision_tool(&d.tools[1]).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(installs.lock().unwrap().is_empty());
    }

    #[test]
    fn test_status() {
        let (p, _) = provisioner(None);
        let d = descriptor();
        assert_eq!(p.status(&d.tools[0]).unwrap(), ToolStatus::Installed);
        assert_eq!(p.status(&d.tools[1]).unwrap(), ToolStatus::Missing);
        assert_eq!(ToolStatus::Missing.to_string(), "missing");
    }
}
