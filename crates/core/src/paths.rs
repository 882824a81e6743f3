//! Centralized path management for agentenv.
//!
//! System paths named in a descriptor (`/home/jenkins`, `/etc/localtime`)
//! are always interpreted relative to a *sysroot*. Image builds use `/`;
//! tests point the sysroot at a scratch directory.
//!
//! The state directory holding the environment receipt supports the
//! `AGENTENV_STATE_DIR` override for CI.

use crate::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Filename of the environment receipt inside the state directory.
pub const ENVIRONMENT_FILE: &str = "environment.json";

/// Location of the generated shell profile, relative to the sysroot.
pub const PROFILE_SCRIPT: &str = "/etc/profile.d/agentenv.sh";

/// Get the state directory for agentenv data.
///
/// Resolution order:
/// 1. `AGENTENV_STATE_DIR` environment variable
/// 2. Platform state directory + `/agentenv`
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("AGENTENV_STATE_DIR")
        && !dir.is_empty()
    {
        return Ok(PathBuf::from(dir));
    }

    // state_dir() returns None on macOS, fall back to data_dir()
    let base = dirs::state_dir()
        .or_else(dirs::data_dir)
        .ok_or_else(|| Error::configuration("Could not determine state directory"))?;

    Ok(base.join("agentenv"))
}

/// Base execution path when none is given: the process `PATH`.
#[must_use]
pub fn default_base_path() -> String {
    std::env::var("PATH").unwrap_or_default()
}

/// Get the path of the environment receipt.
pub fn environment_file() -> Result<PathBuf> {
    Ok(state_dir()?.join(ENVIRONMENT_FILE))
}

/// Map an absolute system path under a sysroot.
///
/// `rebase("/", "/etc/timezone")` is `/etc/timezone`;
/// `rebase("/tmp/root", "/etc/timezone")` is `/tmp/root/etc/timezone`.
#[must_use]
pub fn rebase(sysroot: &Path, path: &Path) -> PathBuf {
    let relative: PathBuf = path
        .components()
        .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
        .collect();
    sysroot.join(relative)
}
