//! Command implementations.

pub mod env;
pub mod init;
pub mod list;
pub mod provision;
pub mod verify;

use agentenv_core::descriptor::{DESCRIPTOR_NAME, find_descriptor};
use agentenv_core::tools::{ToolOptions, ToolRegistry};
use agentenv_core::{Descriptor, Environment, Provisioner, paths};
use serde::Serialize;
use std::path::PathBuf;
use tracing::Instrument;

use crate::cli::{Cli, CliError, Commands, OkEnvelope};

/// Settings shared by every command, resolved from global flags.
#[derive(Debug, Clone)]
pub struct Context {
    /// Explicit descriptor path.
    pub descriptor: Option<PathBuf>,
    /// Install root override.
    pub install_root: Option<PathBuf>,
    /// Root for system paths.
    pub sysroot: PathBuf,
    /// State directory override.
    pub state_dir: Option<PathBuf>,
    /// Base execution path override.
    pub base_path: Option<String>,
    /// Emit JSON envelopes.
    pub json: bool,
}

impl Context {
    /// Build the context from parsed arguments.
    #[must_use]
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            descriptor: cli.descriptor.clone(),
            install_root: cli.install_root.clone(),
            sysroot: cli.sysroot.clone(),
            state_dir: cli.state_dir.clone(),
            base_path: cli.base_path.clone(),
            json: cli.json,
        }
    }

    /// Locate the descriptor file.
    pub fn descriptor_path(&self) -> Result<PathBuf, CliError> {
        if let Some(path) = &self.descriptor {
            return Ok(path.clone());
        }
        let cwd = std::env::current_dir()
            .map_err(|e| CliError::other(format!("Cannot read current directory: {e}")))?;
        find_descriptor(&cwd).ok_or_else(|| {
            CliError::config_with_help(
                format!("No {DESCRIPTOR_NAME} found in {} or its parents", cwd.display()),
                "Run 'agentenv init' to create one, or pass --descriptor",
            )
        })
    }

    /// Load and validate the descriptor, applying the install root override.
    pub fn load_descriptor(&self) -> Result<Descriptor, CliError> {
        let path = self.descriptor_path()?;
        let mut descriptor = Descriptor::load(&path)?;
        if let Some(root) = &self.install_root {
            descriptor.environment.install_root.clone_from(root);
        }
        Ok(descriptor)
    }

    /// Path of the environment receipt.
    pub fn environment_file(&self) -> Result<PathBuf, CliError> {
        Ok(match &self.state_dir {
            Some(dir) => dir.join(paths::ENVIRONMENT_FILE),
            None => paths::environment_file()?,
        })
    }

    /// Load the environment receipt written by `provision`.
    pub fn load_environment(&self) -> Result<Environment, CliError> {
        let path = self.environment_file()?;
        Environment::load(&path)?.ok_or_else(|| {
            CliError::config_with_help(
                format!("No provisioned environment at {}", path.display()),
                "Run 'agentenv provision' first",
            )
        })
    }

    /// Provisioner for a descriptor.
    pub fn provisioner(&self, descriptor: &Descriptor, force: bool) -> Result<Provisioner, CliError> {
        let mut options = ToolOptions::new()
            .with_install_root(descriptor.environment.install_root.clone())
            .with_force(force);
        options.base_path.clone_from(&self.base_path);
        Ok(Provisioner::new(create_registry()?, options)?)
    }
}

/// Create a tool registry with available providers.
pub fn create_registry() -> Result<ToolRegistry, CliError> {
    let mut registry = ToolRegistry::new();
    registry.register(agentenv_tools_url::UrlToolProvider::new()?);
    registry.register(agentenv_tools_system::SystemToolProvider::new());
    Ok(registry)
}

/// Print command output: plain text, or the data in an [`OkEnvelope`].
pub fn emit<T: Serialize>(ctx: &Context, text: &str, data: T) -> Result<(), CliError> {
    if ctx.json {
        let json = serde_json::to_string(&OkEnvelope::new(data))
            .map_err(|e| CliError::other(format!("Failed to serialize output: {e}")))?;
        println!("{json}");
    } else {
        print!("{text}");
    }
    Ok(())
}

/// Execute a parsed command line.
pub async fn execute(cli: Cli) -> Result<(), CliError> {
    let ctx = Context::from_cli(&cli);
    let name = match &cli.command {
        Commands::Provision(_) => "provision",
        Commands::Install { .. } => "install",
        Commands::Verify => "verify",
        Commands::Env { .. } => "env",
        Commands::List => "list",
        Commands::Check => "check",
        Commands::Init { .. } => "init",
    };
    let span = crate::command_span!(name);

    async move {
        match cli.command {
            Commands::Provision(args) => provision::execute_provision(&ctx, &args).await,
            Commands::Install { name, force } => {
                provision::execute_install(&ctx, &name, force).await
            }
            Commands::Verify => verify::execute_verify(&ctx).await,
            Commands::Env { format } => env::execute_env(&ctx, format),
            Commands::List => list::execute_list(&ctx),
            Commands::Check => list::execute_check(&ctx),
            Commands::Init { dir, force } => init::execute_init(&ctx, &dir, force),
        }
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(base_path: Option<&str>) -> Context {
        Context {
            descriptor: None,
            install_root: None,
            sysroot: "/".into(),
            state_dir: None,
            base_path: base_path.map(str::to_string),
            json: false,
        }
    }

    #[test]
    fn test_provisioner_base_path() {
        let descriptor = Descriptor::parse("").unwrap();

        let provisioner = context(Some("/usr/bin:/bin"))
            .provisioner(&descriptor, false)
            .unwrap();
        assert_eq!(provisioner.options().base_path(), "/usr/bin:/bin");

        let provisioner = context(None).provisioner(&descriptor, true).unwrap();
        assert!(provisioner.options().force);
        assert_eq!(
            provisioner.options().base_path(),
            paths::default_base_path()
        );
    }
}
