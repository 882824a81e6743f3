use clap::{Args, Parser, Subcommand, ValueEnum};
use miette::{Diagnostic, Report};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;

use crate::tracing::{LogLevel, TracingFormat};

/// Exit codes for the CLI application
pub const EXIT_OK: i32 = 0;
/// Descriptor, configuration or verification error exit code
pub const EXIT_CLI: i32 = 2;
/// Provisioning error exit code (network, integrity, permission)
pub const EXIT_PROVISION: i32 = 3;

/// CLI-specific error types with proper exit code mapping
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum CliError {
    /// Descriptor or environment configuration error (exit code 2)
    #[error("{message}")]
    #[diagnostic(code(agentenv::cli::config))]
    Config {
        /// The error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },
    /// Provisioning failure (exit code 3)
    #[error("{message}")]
    #[diagnostic(code(agentenv::cli::provision))]
    Provision {
        /// Failure class (`network`, `integrity`, `permission`, `platform`)
        kind: &'static str,
        /// The error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },
    /// Other unexpected error (exit code 3)
    #[error("Unexpected error: {message}")]
    #[diagnostic(code(agentenv::cli::other))]
    Other {
        /// The error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },
}

impl CliError {
    /// Create a new configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    /// Create a new configuration error with help text
    #[must_use]
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create a new other error
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
            help: None,
        }
    }

    /// Short code used in JSON error envelopes.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Provision { kind, .. } => *kind,
            Self::Other { .. } => "other",
        }
    }
}

/// Convert `agentenv_core::Error` to the matching `CliError` variant.
///
/// Descriptor and environment problems are the user's to fix (exit code 2);
/// failures fetching or installing are provisioning failures (exit code 3).
impl From<agentenv_core::Error> for CliError {
    fn from(err: agentenv_core::Error) -> Self {
        let help = err.help().map(|h| h.to_string());
        match err {
            agentenv_core::Error::Configuration { message, .. } => Self::Config { message, help },
            agentenv_core::Error::Validation { .. } => Self::Config {
                message: err.to_string(),
                help,
            },
            agentenv_core::Error::Network { .. }
            | agentenv_core::Error::Integrity { .. }
            | agentenv_core::Error::Permission { .. }
            | agentenv_core::Error::Platform { .. } => Self::Provision {
                kind: err.kind(),
                message: err.to_string(),
                help,
            },
            agentenv_core::Error::Io { .. } => Self::Other {
                message: err.to_string(),
                help: Some("Check file permissions and ensure the path exists".to_string()),
            },
        }
    }
}

/// Map CLI error to appropriate exit code
#[must_use]
pub const fn exit_code_for(err: &CliError) -> i32 {
    match err {
        CliError::Config { .. } => EXIT_CLI,
        CliError::Provision { .. } | CliError::Other { .. } => EXIT_PROVISION,
    }
}

/// Render error appropriately based on JSON flag
pub fn render_error(err: &CliError, json_mode: bool) {
    if json_mode {
        let error_envelope = ErrorEnvelope::new(serde_json::json!({
            "code": err.code(),
            "message": err.to_string(),
        }));

        match serde_json::to_string(&error_envelope) {
            Ok(json) => println!("{json}"),
            Err(_) => eprintln!("Error serializing error response"),
        }
    } else {
        let report = Report::new(err.clone());
        eprintln!("{report:?}");
        let _ = io::stderr().flush();
    }
}

/// Success response envelope for JSON output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkEnvelope<T> {
    /// Status indicator - always "ok" for success
    pub status: &'static str,
    /// The actual data payload
    pub data: T,
}

impl<T> OkEnvelope<T> {
    /// Create a new success envelope
    #[must_use]
    pub const fn new(data: T) -> Self {
        Self { status: "ok", data }
    }
}

/// Error response envelope for JSON output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope<E> {
    /// Status indicator - always "error" for failures
    pub status: &'static str,
    /// The error details
    pub error: E,
}

impl<E> ErrorEnvelope<E> {
    /// Create a new error envelope
    #[must_use]
    pub const fn new(error: E) -> Self {
        Self {
            status: "error",
            error,
        }
    }
}

/// Environment output format.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum, Default)]
pub enum EnvOutput {
    /// `export KEY='value'` lines
    #[default]
    Shell,
    /// `KEY="value"` lines
    Dotenv,
    /// JSON object
    Json,
}

impl From<EnvOutput> for agentenv_core::EnvFormat {
    fn from(format: EnvOutput) -> Self {
        match format {
            EnvOutput::Shell => Self::Shell,
            EnvOutput::Dotenv => Self::Dotenv,
            EnvOutput::Json => Self::Json,
        }
    }
}

/// Provision build-agent environments from a declarative descriptor.
#[derive(Parser, Debug)]
#[command(name = "agentenv")]
#[command(about = "Provision build-agent environments from a declarative descriptor")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Logging verbosity level.
    #[arg(short = 'L', long, global = true, default_value = "warn", value_enum)]
    pub level: LogLevel,

    /// Log output format.
    #[arg(long, global = true, default_value = "compact", value_enum)]
    pub log_format: TracingFormat,

    /// Emit JSON envelopes on stdout.
    #[arg(long, global = true)]
    pub json: bool,

    /// Path to the descriptor (default: agentenv.toml in this or a parent directory).
    #[arg(long, short = 'd', global = true, env = "AGENTENV_DESCRIPTOR")]
    pub descriptor: Option<PathBuf>,

    /// Override the descriptor's install root.
    #[arg(long, global = true)]
    pub install_root: Option<PathBuf>,

    /// Root under which system paths (/etc, /home) are configured.
    #[arg(long, global = true, default_value = "/")]
    pub sysroot: PathBuf,

    /// Directory holding the environment receipt.
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Base execution path (default: the current PATH).
    #[arg(long, global = true)]
    pub base_path: Option<String>,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install every tool, assemble and verify the environment.
    Provision(ProvisionArgs),
    /// Install a single tool.
    Install {
        /// Name of the tool in the descriptor.
        name: String,
        /// Replace an existing install that does not match.
        #[arg(long)]
        force: bool,
    },
    /// Re-run version checks against the provisioned environment.
    Verify,
    /// Print the provisioned environment.
    Env {
        /// Output format.
        #[arg(long, short = 'f', value_enum, default_value_t = EnvOutput::Shell)]
        format: EnvOutput,
    },
    /// List declared tools and their install state.
    List,
    /// Validate the descriptor without touching the system.
    Check,
    /// Write a starter descriptor.
    Init {
        /// Directory to write agentenv.toml into.
        #[arg(default_value = ".")]
        dir: PathBuf,
        /// Overwrite an existing descriptor.
        #[arg(long)]
        force: bool,
    },
}

/// Options of `agentenv provision`.
#[derive(Args, Debug, Clone, Default)]
pub struct ProvisionArgs {
    /// Replace existing installs that do not match.
    #[arg(long)]
    pub force: bool,
    /// Skip timezone, directory and ownership configuration.
    #[arg(long)]
    pub skip_ambient: bool,
    /// Also write a login profile script under the sysroot.
    #[arg(long, conflicts_with = "skip_ambient")]
    pub profile: bool,
}

/// Parse command-line arguments.
#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}
