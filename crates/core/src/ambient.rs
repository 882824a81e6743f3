//! Ambient configuration: timezone, directories and ownership.
//!
//! Every system path is interpreted under a sysroot (see [`crate::paths::rebase`]).

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::descriptor::EnvironmentConfig;
use crate::environment::{EnvFormat, Environment};
use crate::error::IoResultExt;
use crate::paths::{PROFILE_SCRIPT, rebase};
use crate::{Error, Result};

/// Zoneinfo database location.
pub const ZONEINFO_DIR: &str = "/usr/share/zoneinfo";

/// What ambient configuration changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmbientReport {
    /// Timezone that was set.
    pub timezone: Option<String>,
    /// Directories that were ensured, as rebased paths.
    pub directories: Vec<PathBuf>,
    /// User that now owns those directories.
    pub owner: Option<String>,
}

/// Applies ambient configuration under a sysroot.
#[derive(Debug, Clone)]
pub struct AmbientConfigurator {
    sysroot: PathBuf,
}

impl AmbientConfigurator {
    /// Create a configurator for the given sysroot.
    #[must_use]
    pub fn new(sysroot: impl Into<PathBuf>) -> Self {
        Self {
            sysroot: sysroot.into(),
        }
    }

    /// Map a system path under the sysroot.
    #[must_use]
    pub fn path(&self, path: &Path) -> PathBuf {
        rebase(&self.sysroot, path)
    }

    /// Apply timezone, directories and ownership, in that order.
    pub fn apply(&self, config: &EnvironmentConfig) -> Result<AmbientReport> {
        let mut report = AmbientReport::default();

        if let Some(tz) = &config.timezone {
            self.set_timezone(tz)?;
            report.timezone = Some(tz.clone());
        }

        report.directories = self.create_directories(config)?;

        if let Some(user) = &config.user {
            self.transfer_ownership(user, &report.directories)?;
            report.owner = Some(user.clone());
        }

        Ok(report)
    }

    /// Point `/etc/localtime` at the zone and record it in `/etc/timezone`.
    pub fn set_timezone(&self, tz: &str) -> Result<()> {
        let zone = Path::new(ZONEINFO_DIR).join(tz);
        if !self.path(&zone).is_file() {
            return Err(Error::configuration_with_help(
                format!("Unknown timezone '{tz}'"),
                format!("No zone file at {}; is tzdata installed?", zone.display()),
            ));
        }

        let etc = self.path(Path::new("/etc"));
        std::fs::create_dir_all(&etc).with_path(&etc, "create /etc")?;

        let localtime = etc.join("localtime");
        if localtime.symlink_metadata().is_ok() {
            std::fs::remove_file(&localtime).with_path(&localtime, "replace localtime")?;
        }
        link(&zone, &self.path(&zone), &localtime)?;

        let timezone = etc.join("timezone");
        std::fs::write(&timezone, format!("{tz}\n")).with_path(&timezone, "write timezone")?;

        info!(timezone = %tz, "Timezone configured");
        Ok(())
    }

    /// Create home, working and cache directories.
    pub fn create_directories(&self, config: &EnvironmentConfig) -> Result<Vec<PathBuf>> {
        let mut created = Vec::new();
        for dir in config.directories() {
            let path = self.path(&dir);
            std::fs::create_dir_all(&path).with_path(&path, "create directory")?;
            debug!(path = %path.display(), "Directory ready");
            created.push(path);
        }
        Ok(created)
    }

    /// Give `user` recursive ownership of the given directories.
    #[cfg(unix)]
    pub fn transfer_ownership(&self, user: &str, dirs: &[PathBuf]) -> Result<()> {
        use nix::unistd::User;

        let account = User::from_name(user)
            .map_err(|e| Error::permission("/etc/passwd", format!("cannot look up user '{user}': {e}")))?
            .ok_or_else(|| {
                Error::permission("/etc/passwd", format!("user '{user}' does not exist"))
            })?;
        let (uid, gid) = (account.uid.as_raw(), account.gid.as_raw());

        for dir in dirs {
            for entry in walkdir::WalkDir::new(dir).follow_links(false) {
                let entry = entry.map_err(|e| {
                    let path = e.path().map_or_else(|| dir.clone(), Path::to_path_buf);
                    match e.into_io_error() {
                        Some(io) => Error::io(io, &path, "walk directory"),
                        None => Error::permission(path, "directory loop"),
                    }
                })?;
                std::os::unix::fs::lchown(entry.path(), Some(uid), Some(gid))
                    .map_err(|e| Error::permission(entry.path(), format!("chown to '{user}': {e}")))?;
            }
            debug!(path = %dir.display(), user = %user, "Ownership transferred");
        }

        info!(user = %user, directories = dirs.len(), "Ownership transferred");
        Ok(())
    }

    /// Give `user` recursive ownership of the given directories.
    #[cfg(not(unix))]
    pub fn transfer_ownership(&self, _user: &str, _dirs: &[PathBuf]) -> Result<()> {
        Err(Error::platform("ownership transfer requires a unix host"))
    }

    /// Write the environment as a login profile script.
    pub fn write_profile(&self, env: &Environment) -> Result<PathBuf> {
        let path = self.path(Path::new(PROFILE_SCRIPT));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_path(parent, "create profile directory")?;
        }
        let mut script = String::from("# Generated by agentenv\n");
        script.push_str(&env.render(EnvFormat::Shell)?);
        std::fs::write(&path, script).with_path(&path, "write profile")?;
        info!(path = %path.display(), "Profile written");
        Ok(path)
    }
}

#[cfg(unix)]
fn link(target: &Path, _rebased: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link).with_path(link, "link localtime")
}

#[cfg(not(unix))]
fn link(_target: &Path, rebased: &Path, link: &Path) -> Result<()> {
    std::fs::copy(rebased, link)
        .map(|_| ())
        .with_path(link, "copy localtime")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Descriptor;

    fn sysroot_with_zone(zone: &str) -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("usr/share/zoneinfo").join(zone);
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, b"TZif2").unwrap();
        root
    }

    #[cfg(unix)]
    #[test]
    fn test_set_timezone() {
        let root = sysroot_with_zone("Asia/Shanghai");
        let ambient = AmbientConfigurator::new(root.path());
        ambient.set_timezone("Asia/Shanghai").unwrap();
        // idempotent
        ambient.set_timezone("Asia/Shanghai").unwrap();

        let localtime = root.path().join("etc/localtime");
        assert_eq!(
            std::fs::read_link(&localtime).unwrap(),
            PathBuf::from("/usr/share/zoneinfo/Asia/Shanghai")
        );
        assert_eq!(
            std::fs::read_to_string(root.path().join("etc/timezone")).unwrap(),
            "Asia/Shanghai\n"
        );
    }

    #[test]
    fn test_unknown_timezone() {
        let root = sysroot_with_zone("Asia/Shanghai");
        let err = AmbientConfigurator::new(root.path())
            .set_timezone("Mars/Olympus")
            .unwrap_err();
        assert_eq!(err.kind(), "configuration");
        assert!(!root.path().join("etc/localtime").exists());
    }

    #[test]
    fn test_create_directories() {
        let root = tempfile::tempdir().unwrap();
        let d = Descriptor::parse(
            "[environment]\nhome = \"/home/jenkins\"\nworkdir = \"/home/jenkins/agent\"\ncache_dirs = [\"/home/jenkins/.m2/repository\"]\n",
        )
        .unwrap();
        let dirs = AmbientConfigurator::new(root.path())
            .create_directories(&d.environment)
            .unwrap();
        assert_eq!(dirs.len(), 3);
        assert!(root.path().join("home/jenkins/agent").is_dir());
        assert!(root.path().join("home/jenkins/.m2/repository").is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_unknown_user_is_permission_error() {
        let root = tempfile::tempdir().unwrap();
        let err = AmbientConfigurator::new(root.path())
            .transfer_ownership("agentenv-no-such-user", &[root.path().to_path_buf()])
            .unwrap_err();
        assert_eq!(err.kind(), "permission");
    }

    #[cfg(unix)]
    #[test]
    fn test_transfer_ownership_to_current_user() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("home/a/b")).unwrap();
        std::fs::write(root.path().join("home/a/b/f"), "x").unwrap();

        let uid = nix::unistd::Uid::current();
        let Some(me) = nix::unistd::User::from_uid(uid).unwrap() else {
            return;
        };
        AmbientConfigurator::new(root.path())
            .transfer_ownership(&me.name, &[root.path().join("home")])
            .unwrap();

        use std::os::unix::fs::MetadataExt;
        let meta = std::fs::metadata(root.path().join("home/a/b/f")).unwrap();
        assert_eq!(meta.uid(), uid.as_raw());
    }

    #[test]
    fn test_write_profile() {
        let root = tempfile::tempdir().unwrap();
        let mut env = Environment::default();
        env.path = vec![PathBuf::from("/usr/bin"), PathBuf::from("/opt/maven/bin")];
        env.vars.insert("MAVEN_HOME".into(), "/opt/maven".into());

        let path = AmbientConfigurator::new(root.path()).write_profile(&env).unwrap();
        assert_eq!(path, root.path().join("etc/profile.d/agentenv.sh"));
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("export MAVEN_HOME='/opt/maven'"));
        assert!(content.contains("export PATH='/usr/bin:/opt/maven/bin'"));
    }
}
