//! agentenv CLI entry point.

#![allow(clippy::print_stderr)]

use agentenv::cli::{self, CliError, EXIT_OK, exit_code_for, render_error};
use agentenv::commands;
use agentenv::tracing::{TracingConfig, TracingFormat, init_tracing};

fn main() {
    // Tracing may not be usable during a panic
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panicked: {panic_info}");
        eprintln!("Internal error occurred. Run with RUST_LOG=debug for more information.");
    }));

    let cli = cli::parse();
    let json = cli.json;

    let tracing_config = TracingConfig {
        format: if json { TracingFormat::Json } else { cli.log_format },
        level: cli.level.into(),
        ..TracingConfig::default()
    };
    if let Err(e) = init_tracing(tracing_config) {
        eprintln!("Warning: {e}");
    }

    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::other(format!("Runtime error: {e}")))
        .and_then(|rt| rt.block_on(commands::execute(cli)));

    let code = match result {
        Ok(()) => EXIT_OK,
        Err(err) => {
            render_error(&err, json);
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}
