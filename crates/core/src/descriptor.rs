//! Provisioning descriptor (`agentenv.toml`).
//!
//! The descriptor declares which tools an agent environment needs, where
//! their artifacts come from, and the ambient configuration of the
//! environment (timezone, user, directories).
//!
//! ## Structure
//!
//! ```toml
//! [metadata]
//! maintainer = "devops-team@example.com"
//! description = "Jenkins Agent with JDK 17, Maven 3.9.6, Gradle 8.5"
//!
//! [environment]
//! install_root = "/opt"
//! timezone = "Asia/Shanghai"
//! user = "jenkins"
//! home = "/home/jenkins"
//! workdir = "/home/jenkins/agent"
//! cache_dirs = ["/home/jenkins/.m2/repository"]
//!
//! [[tools]]
//! name = "maven"
//! version = "3.9.6"
//! scheme = "semver"
//! source = "url"
//! url = "https://dlcdn.apache.org/maven/maven-3/{version}/binaries/apache-maven-{version}-bin.tar.gz"
//! checksum = "sha512:706f01b2..."
//! executables = ["mvn"]
//! home_var = "MAVEN_HOME"
//! version_command = ["mvn", "-version"]
//! version_pattern = 'Apache Maven (\S+)'
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use crate::checksum::Checksum;
use crate::error::IoResultExt;
use crate::tools::{ArchiveKind, TEMPLATE_PLACEHOLDERS};
use crate::version::{ANY_VERSION, VersionScheme};
use crate::{Error, Result};

/// Current descriptor format version.
pub const DESCRIPTOR_VERSION: u32 = 1;

/// Filename of the descriptor.
pub const DESCRIPTOR_NAME: &str = "agentenv.toml";

/// Default root under which tools are installed.
pub const DEFAULT_INSTALL_ROOT: &str = "/opt";

/// Reference descriptor for a Jenkins Java build agent.
pub const JENKINS_JAVA_TEMPLATE: &str = include_str!("../templates/jenkins-java.toml");

#[allow(clippy::expect_used)]
static TOOL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid regex"));

#[allow(clippy::expect_used)]
static ENV_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

/// The root descriptor structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Descriptor {
    /// Descriptor format version (for future migrations).
    #[serde(default = "default_format")]
    pub format: u32,
    /// Free-form image metadata.
    #[serde(default)]
    pub metadata: Metadata,
    /// Ambient configuration of the environment.
    #[serde(default)]
    pub environment: EnvironmentConfig,
    /// Required tools, in declaration order.
    #[serde(default)]
    pub tools: Vec<ToolRequirement>,
}

fn default_format() -> u32 {
    DESCRIPTOR_VERSION
}

/// Image metadata, carried into the environment receipt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Metadata {
    /// Maintainer contact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintainer: Option<String>,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Descriptor revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Additional labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Ambient configuration: where tools go and who owns the result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentConfig {
    /// Root directory for installed tools.
    #[serde(default = "default_install_root")]
    pub install_root: PathBuf,
    /// Timezone identifier (e.g. `Asia/Shanghai`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Non-root user the environment runs as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Home directory of that user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<PathBuf>,
    /// Working directory of the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
    /// Writable cache directories (e.g. the Maven local repository).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cache_dirs: Vec<PathBuf>,
    /// Extra environment variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, String>,
}

fn default_install_root() -> PathBuf {
    PathBuf::from(DEFAULT_INSTALL_ROOT)
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            install_root: default_install_root(),
            timezone: None,
            user: None,
            home: None,
            workdir: None,
            cache_dirs: Vec::new(),
            vars: BTreeMap::new(),
        }
    }
}

/// A single tool requirement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolRequirement {
    /// Tool name; also the default install directory name.
    pub name: String,
    /// Requested version, or `*` for system tools of any version.
    pub version: String,
    /// Versioning scheme the version is validated against.
    #[serde(default)]
    pub scheme: VersionScheme,
    /// Where the tool comes from.
    #[serde(flatten)]
    pub source: RequirementSource,
    /// Executables the tool provides. Defaults to the tool name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub executables: Vec<String>,
    /// Variable pointing at the install path (e.g. `MAVEN_HOME`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_var: Option<String>,
    /// Path precedence; lower values win.
    #[serde(default)]
    pub precedence: i32,
    /// Place this tool ahead of the base `PATH`.
    #[serde(default)]
    pub authoritative: bool,
    /// Command printing the tool's version. Defaults to `<executable> --version`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub version_command: Vec<String>,
    /// Regex with one capture group extracting the reported version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_pattern: Option<String>,
    /// Install directory overriding `<install_root>/<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_dir: Option<PathBuf>,
    /// Keys not claimed by any field above. The source keys show up here
    /// too, since the flattened source enum does not consume them.
    #[serde(flatten, skip_serializing)]
    pub extra: BTreeMap<String, toml::Value>,
}

/// Keys read by [`RequirementSource::Url`].
const URL_SOURCE_KEYS: &[&str] =
    &["source", "url", "checksum", "archive", "strip_components", "bin_dir"];

/// Source of a tool requirement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum RequirementSource {
    /// Archive downloaded from a URL template.
    Url {
        /// URL template with `{name}`, `{version}`, `{os}`, `{arch}` placeholders.
        url: String,
        /// Expected checksum of the archive (`sha256:…` or `sha512:…`).
        checksum: String,
        /// Archive format; inferred from the URL when omitted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        archive: Option<ArchiveKind>,
        /// Leading path components to strip. When omitted a single
        /// top-level directory is stripped.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        strip_components: Option<usize>,
        /// Directory inside the install path holding the executables.
        #[serde(default = "default_bin_dir")]
        bin_dir: String,
    },
    /// Provided by the base image and found on the execution path.
    System,
}

fn default_bin_dir() -> String {
    "bin".to_string()
}

impl RequirementSource {
    /// Provider name handling this source.
    #[must_use]
    pub const fn provider_type(&self) -> &'static str {
        match self {
            Self::Url { .. } => "url",
            Self::System => "system",
        }
    }
}

impl ToolRequirement {
    /// Executables provided by the tool.
    #[must_use]
    pub fn executables(&self) -> Vec<String> {
        if self.executables.is_empty() {
            vec![self.name.clone()]
        } else {
            self.executables.clone()
        }
    }

    /// Command used to query the installed version.
    #[must_use]
    pub fn version_command(&self) -> Vec<String> {
        if self.version_command.is_empty() {
            let exe = self
                .executables
                .first()
                .cloned()
                .unwrap_or_else(|| self.name.clone());
            vec![exe, "--version".to_string()]
        } else {
            self.version_command.clone()
        }
    }

    /// Whether any reported version is acceptable.
    #[must_use]
    pub fn accepts_any_version(&self) -> bool {
        self.version == ANY_VERSION
    }

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let name = &self.name;

        if !TOOL_NAME.is_match(name) {
            problems.push(format!("tool name '{name}' is invalid"));
        }

        if let Err(e) = self.scheme.validate(&self.version) {
            problems.push(format!("tool '{name}': {}", validation_message(&e)));
        }

        if let RequirementSource::Url {
            url,
            checksum,
            archive,
            bin_dir,
            ..
        } = &self.source
        {
            if self.accepts_any_version() {
                problems.push(format!(
                    "tool '{name}': url sources need a concrete version, not '{ANY_VERSION}'"
                ));
            }
            if url.trim().is_empty() {
                problems.push(format!("tool '{name}': url is empty"));
            }
            for placeholder in placeholders(url) {
                if !TEMPLATE_PLACEHOLDERS.contains(&placeholder) {
                    problems.push(format!(
                        "tool '{name}': unknown placeholder '{{{placeholder}}}' in url"
                    ));
                }
            }
            if let Err(e) = checksum.parse::<Checksum>() {
                problems.push(format!("tool '{name}': {}", validation_message(&e)));
            }
            if archive.is_none() && ArchiveKind::from_url(url).is_none() {
                problems.push(format!(
                    "tool '{name}': cannot infer archive format from url, set 'archive'"
                ));
            }
            if !is_relative_clean(Path::new(bin_dir)) {
                problems.push(format!(
                    "tool '{name}': bin_dir '{bin_dir}' must be a relative path inside the install directory"
                ));
            }
        }

        for exe in &self.executables {
            if exe.is_empty() || exe.contains('/') {
                problems.push(format!("tool '{name}': executable '{exe}' is invalid"));
            }
        }

        if let Some(var) = &self.home_var
            && !ENV_NAME.is_match(var)
        {
            problems.push(format!("tool '{name}': home_var '{var}' is not a variable name"));
        }

        if self.version_command.iter().any(String::is_empty) {
            problems.push(format!("tool '{name}': version_command has an empty argument"));
        }

        if let Some(pattern) = &self.version_pattern {
            match Regex::new(pattern) {
                Ok(re) if re.captures_len() < 2 => problems.push(format!(
                    "tool '{name}': version_pattern needs a capture group"
                )),
                Ok(_) => {}
                Err(e) => problems.push(format!("tool '{name}': version_pattern is invalid: {e}")),
            }
        }

        if let Some(dir) = &self.install_dir
            && !dir.is_absolute()
        {
            problems.push(format!(
                "tool '{name}': install_dir '{}' must be absolute",
                dir.display()
            ));
        }

        let source_keys: &[&str] = match self.source {
            RequirementSource::Url { .. } => URL_SOURCE_KEYS,
            RequirementSource::System => &["source"],
        };
        for key in self.extra.keys() {
            if !source_keys.contains(&key.as_str()) {
                problems.push(format!("tool '{name}': unknown field '{key}'"));
            }
        }

        problems
    }
}

impl EnvironmentConfig {
    /// Home directory: the configured one, else `/home/<user>`.
    #[must_use]
    pub fn home_dir(&self) -> Option<PathBuf> {
        self.home.clone().or_else(|| {
            self.user
                .as_ref()
                .map(|user| PathBuf::from("/home").join(user))
        })
    }

    /// Directories the environment needs, in creation order.
    #[must_use]
    pub fn directories(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        for dir in self
            .home_dir()
            .into_iter()
            .chain(self.workdir.iter().cloned())
            .chain(self.cache_dirs.iter().cloned())
        {
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
        dirs
    }

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if !self.install_root.is_absolute() {
            problems.push(format!(
                "install_root '{}' must be absolute",
                self.install_root.display()
            ));
        }

        if let Some(user) = &self.user {
            if user.trim().is_empty() {
                problems.push("user is empty".to_string());
            } else if user == "root" {
                problems.push("user must be a non-root identity".to_string());
            }
        }

        if let Some(tz) = &self.timezone
            && (tz.is_empty() || Path::new(tz).is_absolute() || !is_relative_clean(Path::new(tz)))
        {
            problems.push(format!("timezone '{tz}' is not a zoneinfo identifier"));
        }

        let dirs = self
            .home
            .iter()
            .chain(self.workdir.iter())
            .chain(self.cache_dirs.iter());
        for dir in dirs {
            if !dir.is_absolute() {
                problems.push(format!("directory '{}' must be absolute", dir.display()));
            }
        }

        for name in self.vars.keys() {
            if !ENV_NAME.is_match(name) {
                problems.push(format!("variable name '{name}' is invalid"));
            }
        }

        problems
    }
}

impl Descriptor {
    /// Parse a descriptor from TOML text without validating it.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::validation(format!("Failed to parse descriptor: {e}")))
    }

    /// Load and validate a descriptor file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path, "read descriptor")?;
        let descriptor = Self::parse(&content).map_err(|e| {
            Error::validation(format!("{}: {}", path.display(), validation_message(&e)))
        })?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Check every invariant of the descriptor.
    ///
    /// All problems are reported at once.
    pub fn validate(&self) -> Result<()> {
        if self.format > DESCRIPTOR_VERSION {
            return Err(Error::validation(format!(
                "Descriptor format {} is newer than supported format {}. Please upgrade agentenv.",
                self.format, DESCRIPTOR_VERSION
            )));
        }

        let mut problems = self.environment.problems();
        let mut seen = HashSet::new();
        for tool in &self.tools {
            if !seen.insert(tool.name.as_str()) {
                problems.push(format!("tool '{}' is declared more than once", tool.name));
            }
            problems.extend(tool.problems());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::validation(problems.join("; ")))
        }
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn tool(&self, name: &str) -> Option<&ToolRequirement> {
        self.tools.iter().find(|t| t.name == name)
    }
}

/// Find the descriptor by walking up from `start`.
#[must_use]
pub fn find_descriptor(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        let candidate = current.join(DESCRIPTOR_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}

fn validation_message(err: &Error) -> String {
    match err {
        Error::Validation { message } => message.clone(),
        other => other.to_string(),
    }
}

fn placeholders(template: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else { break };
        found.push(&after[..end]);
        rest = &after[end + 1..];
    }
    found
}

fn is_relative_clean(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
