//! `agentenv provision` and `agentenv install`.

use agentenv_core::{AmbientConfigurator, EnvironmentAssembler};
use agentenv_core::tools::InstalledTool;
use std::fmt::Write as _;
use tracing::info;

use super::{Context, emit};
use crate::cli::{CliError, ProvisionArgs};

fn describe(tool: &InstalledTool) -> String {
    let state = match (tool.provider.as_str(), tool.newly_installed) {
        ("system", _) => "found",
        (_, true) => "installed",
        (_, false) => "unchanged",
    };
    format!(
        "{:<12} {:<10} {:<10} {}\n",
        tool.name,
        tool.version,
        state,
        tool.install_path.display()
    )
}

/// Install every tool, assemble, verify and configure the environment.
///
/// The environment receipt is written only when every step succeeded. The
/// profile script is written after it, so a failed profile write leaves the
/// receipt in place.
pub async fn execute_provision(ctx: &Context, args: &ProvisionArgs) -> Result<(), CliError> {
    let descriptor = ctx.load_descriptor()?;
    let provisioner = ctx.provisioner(&descriptor, args.force)?;

    let installed = provisioner.provision(&descriptor).await?;

    let environment = EnvironmentAssembler::new(&descriptor)
        .with_base_path(provisioner.options().base_path())
        .with_sysroot(&ctx.sysroot)
        .with_ambient(!args.skip_ambient)
        .assemble(&installed)
        .await?;

    let mut text = String::new();
    for tool in &environment.tools {
        text.push_str(&describe(tool));
    }
    for shadowed in &environment.shadowed {
        let _ = writeln!(
            text,
            "note: '{}' from {} is shadowed by {}",
            shadowed.executable, shadowed.tool, shadowed.winner
        );
    }

    let receipt = ctx.environment_file()?;
    environment.save(&receipt)?;
    info!(path = %receipt.display(), tools = environment.tools.len(), "Environment provisioned");
    let _ = writeln!(text, "environment written to {}", receipt.display());

    if args.profile {
        let profile = AmbientConfigurator::new(&ctx.sysroot).write_profile(&environment)?;
        let _ = writeln!(text, "profile written to {}", profile.display());
    }

    emit(ctx, &text, &environment)
}

/// Install one tool from the descriptor.
pub async fn execute_install(ctx: &Context, name: &str, force: bool) -> Result<(), CliError> {
    let descriptor = ctx.load_descriptor()?;
    let requirement = descriptor.tool(name).ok_or_else(|| {
        let known: Vec<_> = descriptor.tools.iter().map(|t| t.name.as_str()).collect();
        CliError::config_with_help(
            format!("Tool '{name}' is not declared in the descriptor"),
            format!("Declared tools: {}", known.join(", ")),
        )
    })?;

    let provisioner = ctx.provisioner(&descriptor, force)?;
    provisioner.check_prerequisites(std::slice::from_ref(requirement)).await?;
    let installed = provisioner.provision_tool(requirement).await?;

    emit(ctx, &describe(&installed), &installed)
}
