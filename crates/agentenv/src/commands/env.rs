//! `agentenv env`: print the provisioned environment.

use super::{Context, emit};
use crate::cli::{CliError, EnvOutput};

/// Render the environment receipt in the requested format.
pub fn execute_env(ctx: &Context, format: EnvOutput) -> Result<(), CliError> {
    let environment = ctx.load_environment()?;
    let text = environment.render(format.into())?;
    emit(ctx, &text, environment.to_vars())
}
