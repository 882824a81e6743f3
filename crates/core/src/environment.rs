//! Environment assembly.
//!
//! Turns installed tools into an execution environment: the ordered `PATH`,
//! tool home variables and ambient variables, then verifies every tool and
//! applies ambient configuration.
//!
//! Path order is explicit. Each tool has a `precedence` (lower wins) and an
//! `authoritative` flag:
//!
//! ```text
//! PATH = authoritative tools by (precedence, declaration)
//!      : base PATH
//!      : other tools by (precedence, declaration)
//! ```
//!
//! Two tools claiming the same executable at the same position in that order
//! are ambiguous and rejected.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::ambient::AmbientConfigurator;
use crate::descriptor::{Descriptor, Metadata, RequirementSource};
use crate::error::IoResultExt;
use crate::tools::InstalledTool;
use crate::verify::{VerifiedTool, verify_environment};
use crate::{Error, Result};

/// Position of a tool's directories relative to the base `PATH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Group {
    Authoritative,
    Base,
    Appended,
}

/// An executable claim that lost to a higher-precedence tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowedClaim {
    /// Executable name.
    pub executable: String,
    /// Tool whose claim is shadowed.
    pub tool: String,
    /// Tool that resolves the executable.
    pub winner: String,
}

/// A verified execution environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// Descriptor metadata.
    #[serde(default)]
    pub metadata: Metadata,
    /// Installed tools in path order.
    pub tools: Vec<InstalledTool>,
    /// Execution path entries.
    pub path: Vec<PathBuf>,
    /// Environment variables other than `PATH`.
    pub vars: BTreeMap<String, String>,
    /// Executable name to the tool that provides it.
    pub claims: BTreeMap<String, String>,
    /// Claims hidden by a higher-precedence tool.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shadowed: Vec<ShadowedClaim>,
    /// Post-install version checks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verified: Vec<VerifiedTool>,
    /// Agent working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
    /// Identity the environment runs as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// Output format for an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvFormat {
    /// POSIX shell `export` statements.
    #[default]
    Shell,
    /// `KEY="value"` lines.
    Dotenv,
    /// JSON object of variables.
    Json,
}

impl Environment {
    /// `PATH` value.
    #[must_use]
    pub fn path_string(&self) -> String {
        self.path
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(":")
    }

    /// All variables including `PATH`.
    #[must_use]
    pub fn to_vars(&self) -> BTreeMap<String, String> {
        let mut vars = self.vars.clone();
        vars.insert("PATH".to_string(), self.path_string());
        vars
    }

    /// Find an installed tool by name.
    #[must_use]
    pub fn tool(&self, name: &str) -> Option<&InstalledTool> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Render the variables in the given format.
    pub fn render(&self, format: EnvFormat) -> Result<String> {
        let vars = self.to_vars();
        match format {
            EnvFormat::Shell => Ok(vars
                .iter()
                .map(|(k, v)| format!("export {k}={}\n", shell_quote(v)))
                .collect()),
            EnvFormat::Dotenv => Ok(vars
                .iter()
                .map(|(k, v)| format!("{k}=\"{}\"\n", v.replace('\\', "\\\\").replace('"', "\\\"")))
                .collect()),
            EnvFormat::Json => serde_json::to_string_pretty(&vars)
                .map(|s| s + "\n")
                .map_err(|e| Error::configuration(format!("Failed to serialize environment: {e}"))),
        }
    }

    /// Load an environment receipt.
    ///
    /// Returns `None` if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).with_path(path, "read environment")?;
        serde_json::from_str(&content).map(Some).map_err(|e| {
            Error::configuration(format!(
                "Failed to parse environment receipt {}: {e}",
                path.display()
            ))
        })
    }

    /// Write the environment receipt.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_path(parent, "create state directory")?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::configuration(format!("Failed to serialize environment: {e}")))?;
        std::fs::write(path, content).with_path(path, "write environment")
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Assembles, verifies and configures an environment from installed tools.
pub struct EnvironmentAssembler<'a> {
    descriptor: &'a Descriptor,
    base_path: String,
    sysroot: PathBuf,
    apply_ambient: bool,
}

impl<'a> EnvironmentAssembler<'a> {
    /// Create an assembler for a descriptor.
    #[must_use]
    pub fn new(descriptor: &'a Descriptor) -> Self {
        Self {
            descriptor,
            base_path: crate::paths::default_base_path(),
            sysroot: PathBuf::from("/"),
            apply_ambient: true,
        }
    }

    /// Set the base execution path.
    #[must_use]
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// Set the sysroot for ambient configuration.
    #[must_use]
    pub fn with_sysroot(mut self, sysroot: impl Into<PathBuf>) -> Self {
        self.sysroot = sysroot.into();
        self
    }

    /// Enable or disable ambient configuration.
    #[must_use]
    pub fn with_ambient(mut self, apply: bool) -> Self {
        self.apply_ambient = apply;
        self
    }

    /// Build the environment: path order, claims and variables.
    ///
    /// Performs no I/O.
    pub fn build(&self, installed: &[InstalledTool]) -> Result<Environment> {
        let requirements: HashMap<&str, (usize, &crate::descriptor::ToolRequirement)> = self
            .descriptor
            .tools
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.as_str(), (i, t)))
            .collect();

        let mut ordered = Vec::with_capacity(installed.len());
        for tool in installed {
            let (index, req) = requirements.get(tool.name.as_str()).ok_or_else(|| {
                Error::configuration(format!(
                    "Installed tool '{}' is not declared in the descriptor",
                    tool.name
                ))
            })?;
            let group = match (&req.source, req.authoritative) {
                (RequirementSource::System, _) => Group::Base,
                (_, true) => Group::Authoritative,
                (_, false) => Group::Appended,
            };
            ordered.push(((group, req.precedence, *index), tool));
        }
        ordered.sort_by_key(|(key, _)| *key);

        let (claims, shadowed) = resolve_claims(&ordered)?;

        let mut path = Vec::new();
        let mut seen = HashSet::new();
        let mut push = |dir: PathBuf, path: &mut Vec<PathBuf>| {
            if seen.insert(dir.clone()) {
                path.push(dir);
            }
        };
        for ((group, _, _), tool) in &ordered {
            if *group == Group::Authoritative {
                for dir in &tool.bin_dirs {
                    push(dir.clone(), &mut path);
                }
            }
        }
        for entry in self.base_path.split(':').filter(|e| !e.is_empty()) {
            push(PathBuf::from(entry), &mut path);
        }
        for ((group, _, _), tool) in &ordered {
            if *group == Group::Appended {
                for dir in &tool.bin_dirs {
                    push(dir.clone(), &mut path);
                }
            }
        }

        let vars = self.build_vars(&ordered)?;
        let config = &self.descriptor.environment;

        Ok(Environment {
            metadata: self.descriptor.metadata.clone(),
            tools: ordered.into_iter().map(|(_, t)| t.clone()).collect(),
            path,
            vars,
            claims,
            shadowed,
            verified: Vec::new(),
            workdir: config.workdir.clone(),
            user: config.user.clone(),
        })
    }

    fn build_vars(
        &self,
        ordered: &[((Group, i32, usize), &InstalledTool)],
    ) -> Result<BTreeMap<String, String>> {
        let config = &self.descriptor.environment;
        let mut vars = BTreeMap::new();

        if let Some(tz) = &config.timezone {
            vars.insert("TZ".to_string(), tz.clone());
        }
        if let Some(user) = &config.user {
            vars.insert("USER".to_string(), user.clone());
        }
        if let Some(home) = config.home_dir() {
            vars.insert("HOME".to_string(), home.to_string_lossy().into_owned());
        }

        for (_, tool) in ordered {
            let Some(var) = &tool.home_var else { continue };
            let value = tool.install_path.to_string_lossy().into_owned();
            if let Some(previous) = vars.insert(var.clone(), value) {
                return Err(Error::configuration(format!(
                    "Variable {var} is set by more than one tool (previous value '{previous}')"
                )));
            }
        }

        for (name, value) in &config.vars {
            if name == "PATH" {
                return Err(Error::configuration_with_help(
                    "PATH cannot be set in [environment.vars]",
                    "Use tool precedence and 'authoritative' to order the execution path",
                ));
            }
            vars.insert(name.clone(), value.clone());
        }

        Ok(vars)
    }

    /// Build, verify, then apply ambient configuration.
    ///
    /// Verification runs before ownership changes so that files created by
    /// version queries end up owned by the target user too. Nothing is
    /// returned unless every step succeeds.
    pub async fn assemble(&self, installed: &[InstalledTool]) -> Result<Environment> {
        let mut environment = self.build(installed)?;
        debug!(path = %environment.path_string(), "Assembled execution path");

        let requirements: Vec<_> = self
            .descriptor
            .tools
            .iter()
            .filter(|r| environment.tool(&r.name).is_some())
            .cloned()
            .collect();
        environment.verified = verify_environment(&requirements, &environment).await?;

        if self.apply_ambient {
            AmbientConfigurator::new(&self.sysroot).apply(&self.descriptor.environment)?;
        } else {
            info!("Skipping ambient configuration");
        }

        Ok(environment)
    }
}

type Claims = (BTreeMap<String, String>, Vec<ShadowedClaim>);

fn resolve_claims(ordered: &[((Group, i32, usize), &InstalledTool)]) -> Result<Claims> {
    let mut owners: BTreeMap<String, ((Group, i32), &str)> = BTreeMap::new();
    let mut shadowed = Vec::new();

    // `ordered` is sorted, so the first claimer of a name wins unless the
    // next one sits at the same (group, precedence).
    for ((group, precedence, _), tool) in ordered {
        let key = (*group, *precedence);
        for exe in &tool.executables {
            match owners.get(exe) {
                None => {
                    owners.insert(exe.clone(), (key, tool.name.as_str()));
                }
                Some((owner_key, owner)) if *owner_key == key => {
                    return Err(Error::configuration_with_help(
                        format!(
                            "Tools '{owner}' and '{}' both provide '{exe}' with precedence {precedence}",
                            tool.name
                        ),
                        "Give one of them a lower precedence or mark it authoritative",
                    ));
                }
                Some((_, owner)) => {
                    warn!(executable = %exe, tool = %tool.name, winner = %owner, "Executable is shadowed");
                    shadowed.push(ShadowedClaim {
                        executable: exe.clone(),
                        tool: tool.name.clone(),
                        winner: (*owner).to_string(),
                    });
                }
            }
        }
    }

    let claims = owners
        .into_iter()
        .map(|(exe, (_, owner))| (exe, owner.to_string()))
        .collect();
    Ok((claims, shadowed))
}
