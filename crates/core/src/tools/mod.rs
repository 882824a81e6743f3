//! Tool provider system for installing build tools.
//!
//! This module provides a pluggable system for installing tools from
//! various sources (URL archives, the base image). Each source is implemented
//! as a `ToolProvider` that can resolve and install tools.
//!
//! # Architecture
//!
//! - [`ToolProvider`] - Trait implemented by each source
//! - [`ToolRegistry`] - Collection of registered providers
//! - [`Platform`], [`Os`], [`Arch`] - Platform identification for URL templates
//! - [`ToolSource`] - Source-specific resolution data
//! - [`ResolvedTool`] - A fully resolved tool ready to install
//! - [`InstalledTool`] - Result of installing a tool
//!
//! # Example
//!
//! ```ignore
//! use agentenv_core::tools::{ToolRegistry, ToolOptions};
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(UrlToolProvider::new()?);
//! registry.register(SystemToolProvider::new());
//!
//! let provider = registry.get("url").unwrap();
//! let resolved = provider.resolve(&request)?;
//! let installed = provider.install(&resolved, &ToolOptions::default()).await?;
//! ```

mod provider;
mod receipt;
mod registry;

pub use provider::{
    Arch, ArchiveKind, InstalledTool, Os, Platform, ResolvedTool, TEMPLATE_PLACEHOLDERS,
    ToolOptions, ToolProvider, ToolResolveRequest, ToolSource, bin_dir_of, expand_template,
};
pub use receipt::{InstallReceipt, RECEIPT_FILE, RECEIPT_VERSION};
pub use registry::ToolRegistry;
