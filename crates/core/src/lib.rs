//! Core types for agentenv: provisioning descriptors, the provisioner and
//! the environment assembler.
//!
//! A run goes through three stages:
//!
//! 1. [`Descriptor`] is loaded and validated.
//! 2. [`Provisioner`] installs each requirement through a [`tools::ToolProvider`].
//! 3. [`EnvironmentAssembler`] builds the execution path, verifies every tool
//!    and applies ambient configuration.
//!
//! Any failure aborts the run.

pub mod ambient;
pub mod checksum;
pub mod descriptor;
pub mod environment;
pub mod error;
pub mod paths;
pub mod provision;
pub mod tools;
pub mod verify;
pub mod version;

pub use ambient::{AmbientConfigurator, AmbientReport};
pub use checksum::{Checksum, ChecksumAlgorithm};
pub use descriptor::{Descriptor, EnvironmentConfig, RequirementSource, ToolRequirement};
pub use environment::{EnvFormat, Environment, EnvironmentAssembler, ShadowedClaim};
pub use error::{Error, IoResultExt, Result};
pub use provision::{Provisioner, ToolStatus};
pub use verify::VerifiedTool;
pub use version::VersionScheme;
