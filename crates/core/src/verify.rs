//! Post-install version verification.
//!
//! Each tool's version command is resolved against the assembled execution
//! path and run with exactly the assembled variables, so the check observes
//! what a build step will observe.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;
use tracing::{debug, info};

use crate::descriptor::ToolRequirement;
use crate::environment::Environment;
use crate::{Error, Result};

#[allow(clippy::expect_used)]
static VERSION_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d+(?:\.\d+)+(?:[-+][0-9A-Za-z][0-9A-Za-z.+-]*)?").expect("valid regex")
});

/// Result of verifying one tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedTool {
    /// Tool name.
    pub name: String,
    /// Version the descriptor asked for.
    pub expected: String,
    /// Version the tool reported, if one could be extracted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported: Option<String>,
    /// Executable that answered the version query.
    pub program: PathBuf,
}

/// Extract the version a tool reported.
///
/// With a pattern, its first capture group is the version. Without one, the
/// expected version is looked up as a whole token, falling back to the first
/// dotted version in the output.
#[must_use]
pub fn reported_version(output: &str, expected: &str, pattern: Option<&Regex>) -> Option<String> {
    if let Some(pattern) = pattern {
        return pattern
            .captures(output)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
    }

    if contains_token(output, expected) {
        return Some(expected.to_string());
    }

    VERSION_TOKEN
        .find(output)
        .map(|m| m.as_str().to_string())
}

fn contains_token(haystack: &str, token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    let is_word = |c: char| c.is_ascii_alphanumeric();
    haystack.match_indices(token).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = &haystack[start + token.len()..];
        let mut rest = after.chars();
        let next = rest.next();
        let before_ok = before.is_none_or(|c| !is_word(c) && c != '.');
        let after_ok = match next {
            None => true,
            Some('.') => rest.next().is_none_or(|c| !c.is_ascii_digit()),
            // A qualifier (`-rc-1`, `-SNAPSHOT`, `+9`) makes it a different version.
            Some('-' | '+') => rest.next().is_none_or(|c| !is_word(c)),
            Some(c) => !is_word(c),
        };
        before_ok && after_ok
    })
}

/// Verify one tool inside an assembled environment.
pub async fn verify_tool(requirement: &ToolRequirement, env: &Environment) -> Result<VerifiedTool> {
    let command = requirement.version_command();
    let Some((program, args)) = command.split_first() else {
        return Err(Error::configuration(format!(
            "Tool '{}' has an empty version command",
            requirement.name
        )));
    };

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    let resolved = which::which_in(program, Some(env.path_string()), cwd).map_err(|_| {
        Error::configuration_with_help(
            format!(
                "Tool '{}': '{program}' is not on the assembled execution path",
                requirement.name
            ),
            format!("PATH was {}", env.path_string()),
        )
    })?;

    debug!(tool = %requirement.name, program = %resolved.display(), ?args, "Querying version");
    let output = tokio::process::Command::new(&resolved)
        .args(args)
        .env_clear()
        .envs(env.to_vars())
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| {
            Error::configuration(format!(
                "Tool '{}': failed to run {}: {e}",
                requirement.name,
                resolved.display()
            ))
        })?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        return Err(Error::configuration_with_help(
            format!(
                "Tool '{}': '{}' exited with {}",
                requirement.name,
                command.join(" "),
                output.status
            ),
            excerpt(&text),
        ));
    }

    let pattern = requirement
        .version_pattern
        .as_deref()
        .map(Regex::new)
        .transpose()
        .map_err(|e| {
            Error::configuration(format!(
                "Tool '{}': invalid version_pattern: {e}",
                requirement.name
            ))
        })?;
    let reported = reported_version(&text, &requirement.version, pattern.as_ref());

    if !requirement.accepts_any_version() && reported.as_deref() != Some(requirement.version.as_str())
    {
        let message = match &reported {
            Some(found) => format!(
                "Tool '{}' reports version {found}, expected {}",
                requirement.name, requirement.version
            ),
            None => format!(
                "Tool '{}' did not report a version, expected {}",
                requirement.name, requirement.version
            ),
        };
        return Err(Error::configuration_with_help(message, excerpt(&text)));
    }

    info!(
        tool = %requirement.name,
        version = reported.as_deref().unwrap_or("unknown"),
        "Verified"
    );

    Ok(VerifiedTool {
        name: requirement.name.clone(),
        expected: requirement.version.clone(),
        reported,
        program: resolved,
    })
}

/// Verify tools in order, stopping at the first failure.
pub async fn verify_environment(
    requirements: &[ToolRequirement],
    env: &Environment,
) -> Result<Vec<VerifiedTool>> {
    let mut verified = Vec::with_capacity(requirements.len());
    for requirement in requirements {
        verified.push(verify_tool(requirement, env).await?);
    }
    Ok(verified)
}

fn excerpt(output: &str) -> String {
    let lines: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).take(5).collect();
    if lines.is_empty() {
        "The command produced no output".to_string()
    } else {
        format!("Output:\n{}", lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Descriptor;

    #[test]
    fn test_reported_version_with_pattern() {
        let re = Regex::new(r#"version "(\d+)"#).unwrap();
        let out = "openjdk version \"17.0.9\" 2023-10-17\nOpenJDK Runtime Environment";
        assert_eq!(reported_version(out, "17", Some(&re)).as_deref(), Some("17"));

        let re = Regex::new(r"Apache Maven (\S+)").unwrap();
        let out = "Apache Maven 3.9.6 (bc0240f3c744dd6b6ec2920b3cd08dcc295161ae)";
        assert_eq!(reported_version(out, "3.9.6", Some(&re)).as_deref(), Some("3.9.6"));
        assert_eq!(reported_version("nothing", "3.9.6", Some(&re)), None);
    }

    #[test]
    fn test_reported_version_token_match() {
        assert_eq!(
            reported_version("\nGradle 8.5\n\nBuild time: 2023-11-29", "8.5", None).as_deref(),
            Some("8.5")
        );
        // 8.5 must not match inside 8.5.1
        assert_eq!(
            reported_version("Gradle 8.5.1", "8.5", None).as_deref(),
            Some("8.5.1")
        );
        assert_eq!(
            reported_version("git version 2.39.2", "2.39", None).as_deref(),
            Some("2.39.2")
        );
        assert_eq!(reported_version("tool v18.5", "8.5", None).as_deref(), Some("18.5"));
        assert_eq!(reported_version("no digits", "1.0", None), None);
        // Pre-release builds report their full version and fail the comparison
        assert_eq!(
            reported_version("\nGradle 8.5-rc-1\n", "8.5", None).as_deref(),
            Some("8.5-rc-1")
        );
        assert_eq!(
            reported_version("Apache Maven 3.9.6-SNAPSHOT (abc)", "3.9.6", None).as_deref(),
            Some("3.9.6-SNAPSHOT")
        );
    }

    #[test]
    fn test_contains_token() {
        assert!(contains_token("Apache Maven 3.9.6 (x)", "3.9.6"));
        assert!(contains_token("3.9.6", "3.9.6"));
        assert!(contains_token("version 3.9.6.", "3.9.6"));
        assert!(!contains_token("13.9.6", "3.9.6"));
        assert!(!contains_token("3.9.60", "3.9.6"));
        assert!(!contains_token("Gradle 8.5-rc-1", "8.5"));
        assert!(!contains_token("Apache Maven 3.9.6-SNAPSHOT (abc)", "3.9.6"));
        assert!(!contains_token("17.0.9+9", "17.0.9"));
        assert!(contains_token("maven-3.9.6 - built", "3.9.6"));
        assert!(contains_token("Gradle 8.5-rc-1", "8.5-rc-1"));
        assert!(!contains_token("anything", ""));
    }

    #[cfg(unix)]
    fn script_env(dir: &std::path::Path, name: &str, body: &str) -> Environment {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        let mut env = Environment::default();
        env.path = vec![dir.to_path_buf(), PathBuf::from("/usr/bin"), PathBuf::from("/bin")];
        env.vars.insert("MAVEN_HOME".into(), "/opt/maven".into());
        env
    }

    fn requirement(toml: &str) -> ToolRequirement {
        let d = Descriptor::parse(toml).unwrap();
        d.validate().unwrap();
        d.tools[0].clone()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_verify_tool_success() {
        let dir = tempfile::tempdir().unwrap();
        let env = script_env(dir.path(), "mvn", "echo \"Apache Maven 3.9.6\"\necho \"Maven home: $MAVEN_HOME\"");
        let req = requirement(
            "[[tools]]\nname = \"maven\"\nversion = \"3.9.6\"\nsource = \"system\"\nexecutables = [\"mvn\"]\nversion_pattern = 'Apache Maven (\\S+)'\n",
        );
        let verified = verify_tool(&req, &env).await.unwrap();
        assert_eq!(verified.reported.as_deref(), Some("3.9.6"));
        assert_eq!(verified.program, dir.path().join("mvn"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_verify_tool_sees_assembled_vars() {
        let dir = tempfile::tempdir().unwrap();
        let env = script_env(
            dir.path(),
            "mvn",
            "[ \"$MAVEN_HOME\" = /opt/maven ] || exit 7\necho 3.9.6",
        );
        let req = requirement(
            "[[tools]]\nname = \"maven\"\nversion = \"3.9.6\"\nsource = \"system\"\nexecutables = [\"mvn\"]\n",
        );
        verify_tool(&req, &env).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_verify_tool_version_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let env = script_env(dir.path(), "mvn", "echo \"Apache Maven 3.9.5\"");
        let req = requirement(
            "[[tools]]\nname = \"maven\"\nversion = \"3.9.6\"\nsource = \"system\"\nexecutables = [\"mvn\"]\n",
        );
        let err = verify_tool(&req, &env).await.unwrap_err();
        assert_eq!(err.kind(), "configuration");
        assert!(err.to_string().contains("reports version 3.9.5, expected 3.9.6"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_verify_tool_rejects_prerelease_build() {
        let dir = tempfile::tempdir().unwrap();
        let env = script_env(dir.path(), "gradle", "echo\necho \"Gradle 8.5-rc-1\"");
        let req = requirement(
            "[[tools]]\nname = \"gradle\"\nversion = \"8.5\"\nsource = \"system\"\nversion_command = [\"gradle\", \"-version\"]\n",
        );
        let err = verify_tool(&req, &env).await.unwrap_err();
        assert_eq!(err.kind(), "configuration");
        assert!(err.to_string().contains("reports version 8.5-rc-1, expected 8.5"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_verify_tool_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let env = script_env(dir.path(), "git", "echo broken >&2\nexit 3");
        let req = requirement(
            "[[tools]]\nname = \"git\"\nversion = \"*\"\nsource = \"system\"\n",
        );
        let err = verify_tool(&req, &env).await.unwrap_err();
        assert_eq!(err.kind(), "configuration");
        assert!(err.to_string().contains("exited with"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_verify_tool_wildcard_accepts_any_output() {
        let dir = tempfile::tempdir().unwrap();
        let env = script_env(dir.path(), "git", "echo \"git version 2.39.2\"");
        let req = requirement(
            "[[tools]]\nname = \"git\"\nversion = \"*\"\nsource = \"system\"\n",
        );
        let verified = verify_tool(&req, &env).await.unwrap();
        assert_eq!(verified.reported.as_deref(), Some("2.39.2"));
    }

    #[tokio::test]
    async fn test_verify_tool_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = Environment::default();
        env.path = vec![dir.path().to_path_buf()];
        let req = requirement(
            "[[tools]]\nname = \"gradle\"\nversion = \"8.5\"\nsource = \"system\"\n",
        );
        let err = verify_tool(&req, &env).await.unwrap_err();
        assert!(err.to_string().contains("not on the assembled execution path"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_verify_environment_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let env = script_env(dir.path(), "mvn", "echo 3.9.6");
        let d = Descriptor::parse(
            "[[tools]]\nname = \"gradle\"\nversion = \"8.5\"\nsource = \"system\"\n\n[[tools]]\nname = \"maven\"\nversion = \"3.9.6\"\nsource = \"system\"\nexecutables = [\"mvn\"]\n",
        )
        .unwrap();
        let err = verify_environment(&d.tools, &env).await.unwrap_err();
        assert!(err.to_string().contains("gradle"));
    }
}
