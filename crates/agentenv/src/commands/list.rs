//! `agentenv list` and `agentenv check`.

use serde::Serialize;

use super::{Context, emit};
use crate::cli::CliError;

#[derive(Debug, Serialize)]
struct ToolRow {
    name: String,
    version: String,
    source: &'static str,
    provider: &'static str,
    status: String,
}

/// List declared tools with their install state.
pub fn execute_list(ctx: &Context) -> Result<(), CliError> {
    let descriptor = ctx.load_descriptor()?;
    let provisioner = ctx.provisioner(&descriptor, false)?;

    let mut rows = Vec::with_capacity(descriptor.tools.len());
    let mut providers: Vec<(&'static str, &'static str)> = Vec::new();
    for requirement in &descriptor.tools {
        let provider = provisioner.provider_for(requirement)?;
        if !providers.iter().any(|(name, _)| *name == provider.name()) {
            providers.push((provider.name(), provider.description()));
        }
        rows.push(ToolRow {
            name: requirement.name.clone(),
            version: requirement.version.clone(),
            source: requirement.source.provider_type(),
            provider: provider.name(),
            status: provisioner.status(requirement)?.to_string(),
        });
    }

    let mut text = String::new();
    if let Some(description) = &descriptor.metadata.description {
        text.push_str(&format!("# {description}\n"));
    }
    for row in &rows {
        text.push_str(&format!(
            "{:<12} {:<10} {:<8} {}\n",
            row.name, row.version, row.source, row.status
        ));
    }
    if !providers.is_empty() {
        text.push('\n');
    }
    for (name, description) in &providers {
        text.push_str(&format!("{name}: {description}\n"));
    }

    let providers: serde_json::Map<String, serde_json::Value> = providers
        .into_iter()
        .map(|(name, description)| (name.to_string(), description.into()))
        .collect();
    emit(
        ctx,
        &text,
        serde_json::json!({
            "metadata": descriptor.metadata,
            "tools": rows,
            "providers": providers,
        }),
    )
}

/// Validate the descriptor without touching the system.
pub fn execute_check(ctx: &Context) -> Result<(), CliError> {
    let path = ctx.descriptor_path()?;
    let descriptor = ctx.load_descriptor()?;

    let text = format!(
        "descriptor OK: {} tools ({})\n",
        descriptor.tools.len(),
        path.display()
    );
    emit(
        ctx,
        &text,
        serde_json::json!({
            "path": path,
            "tools": descriptor.tools.len(),
        }),
    )
}
