//! Error types for agentenv operations.
//!
//! Every failure aborts provisioning. The variants map onto the failure
//! classes a build log needs to distinguish: the artifact could not be
//! reached, its bytes did not match, the resulting environment is wrong, or
//! the process lacked the rights to change ownership and modes.

use miette::Diagnostic;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for agentenv operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while provisioning an environment.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// The artifact source could not be reached.
    #[error("Network error fetching {url}: {message}")]
    #[diagnostic(
        code(agentenv::network),
        help("Check that the artifact URL is reachable from the build host; downloads are not retried")
    )]
    Network {
        /// The URL that was requested.
        url: String,
        /// What went wrong.
        message: String,
    },

    /// The downloaded artifact did not match its declared checksum.
    #[error("Integrity check failed for '{tool}': expected {expected}, got {actual}")]
    #[diagnostic(
        code(agentenv::integrity),
        help("The artifact changed upstream or the descriptor checksum is wrong; nothing was installed")
    )]
    Integrity {
        /// Tool being installed.
        tool: String,
        /// Checksum declared in the descriptor.
        expected: String,
        /// Checksum computed from the downloaded bytes.
        actual: String,
    },

    /// The environment does not match what the descriptor requires.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(agentenv::configuration))]
    Configuration {
        /// The error message.
        message: String,
        /// Optional remediation hint.
        #[help]
        help: Option<String>,
    },

    /// Ownership or mode changes were refused.
    #[error("Permission error on {}: {message}", .path.display())]
    #[diagnostic(
        code(agentenv::permission),
        help("Ambient configuration must run as root, or pass --skip-ambient")
    )]
    Permission {
        /// Path being modified.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// The descriptor is syntactically invalid.
    #[error("Validation failed: {message}")]
    #[diagnostic(code(agentenv::validation))]
    Validation {
        /// The error message.
        message: String,
    },

    /// An I/O operation failed.
    #[error(
        "I/O {operation} failed{}: {source}",
        .path.as_ref().map_or(String::new(), |p| format!(" on {}", p.display()))
    )]
    #[diagnostic(code(agentenv::io))]
    Io {
        /// The underlying error.
        #[source]
        source: std::io::Error,
        /// Path involved, if known.
        path: Option<PathBuf>,
        /// Short description of the operation.
        operation: String,
    },

    /// The host platform is not supported.
    #[error("Unsupported platform: {message}")]
    #[diagnostic(code(agentenv::platform))]
    Platform {
        /// The error message.
        message: String,
    },
}

impl Error {
    /// Create a network error.
    #[must_use]
    pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create an integrity error.
    #[must_use]
    pub fn integrity(
        tool: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Integrity {
            tool: tool.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            help: None,
        }
    }

    /// Create a configuration error with a remediation hint.
    #[must_use]
    pub fn configuration_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create a permission error.
    #[must_use]
    pub fn permission(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Permission {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a platform error.
    #[must_use]
    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform {
            message: message.into(),
        }
    }

    /// Wrap an I/O error with the operation and path it happened on.
    ///
    /// `PermissionDenied` becomes [`Error::Permission`] so callers see one
    /// error kind for every refused filesystem change.
    #[must_use]
    pub fn io(source: std::io::Error, path: &Path, operation: impl Into<String>) -> Self {
        let operation = operation.into();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            return Self::permission(path, format!("{operation}: {source}"));
        }
        Self::Io {
            source,
            path: Some(path.to_path_buf()),
            operation,
        }
    }

    /// Short machine-readable name of the error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Integrity { .. } => "integrity",
            Self::Configuration { .. } => "configuration",
            Self::Permission { .. } => "permission",
            Self::Validation { .. } => "validation",
            Self::Io { .. } => "io",
            Self::Platform { .. } => "platform",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            source,
            path: None,
            operation: "operation".to_string(),
        }
    }
}

/// Extension for attaching path context to `std::io::Result`.
pub trait IoResultExt<T> {
    /// Convert the error into [`Error::io`] with the given path and operation.
    fn with_path(self, path: &Path, operation: &str) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: &Path, operation: &str) -> Result<T> {
        self.map_err(|e| Error::io(e, path, operation))
    }
}
