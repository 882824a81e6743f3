//! `agentenv init`: write a starter descriptor.

use agentenv_core::IoResultExt;
use agentenv_core::descriptor::{DESCRIPTOR_NAME, JENKINS_JAVA_TEMPLATE};
use std::path::Path;

use super::{Context, emit};
use crate::cli::CliError;

/// Write the Jenkins Java agent template to `<dir>/agentenv.toml`.
pub fn execute_init(ctx: &Context, dir: &Path, force: bool) -> Result<(), CliError> {
    let path = dir.join(DESCRIPTOR_NAME);
    if path.exists() && !force {
        return Err(CliError::config_with_help(
            format!("{} already exists", path.display()),
            "Pass --force to overwrite it",
        ));
    }

    std::fs::create_dir_all(dir).with_path(dir, "create directory")?;
    std::fs::write(&path, JENKINS_JAVA_TEMPLATE).with_path(&path, "write descriptor")?;

    emit(
        ctx,
        &format!("Created {}\n", path.display()),
        serde_json::json!({ "path": path }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> Context {
        Context {
            descriptor: None,
            install_root: None,
            sysroot: "/".into(),
            state_dir: None,
            base_path: None,
            json: false,
        }
    }

    #[test]
    fn test_init_writes_template_once() {
        let dir = tempfile::tempdir().unwrap();
        execute_init(&context(), dir.path(), false).unwrap();

        let written = std::fs::read_to_string(dir.path().join(DESCRIPTOR_NAME)).unwrap();
        assert_eq!(written, JENKINS_JAVA_TEMPLATE);

        let err = execute_init(&context(), dir.path(), false).unwrap_err();
        assert!(matches!(err, CliError::Config { .. }));

        execute_init(&context(), dir.path(), true).unwrap();
    }
}
