//! `agentenv verify`: re-run version checks against the provisioned environment.

use agentenv_core::ToolRequirement;
use agentenv_core::verify::verify_environment;

use super::{Context, emit};
use crate::cli::CliError;

/// Verify every provisioned tool, stopping at the first failure.
pub async fn execute_verify(ctx: &Context) -> Result<(), CliError> {
    let descriptor = ctx.load_descriptor()?;
    let environment = ctx.load_environment()?;

    let requirements: Vec<ToolRequirement> = descriptor
        .tools
        .iter()
        .filter(|req| environment.tool(&req.name).is_some())
        .cloned()
        .collect();
    if let Some(missing) = descriptor
        .tools
        .iter()
        .find(|req| environment.tool(&req.name).is_none())
    {
        return Err(CliError::config_with_help(
            format!("Tool '{}' is not part of the provisioned environment", missing.name),
            "Run 'agentenv provision' to bring the environment up to date",
        ));
    }

    let verified = verify_environment(&requirements, &environment).await?;

    let mut text = String::new();
    for tool in &verified {
        text.push_str(&format!(
            "{:<12} {:<10} ok  {}\n",
            tool.name,
            tool.reported.as_deref().unwrap_or(&tool.expected),
            tool.program.display()
        ));
    }
    emit(ctx, &text, &verified)
}
