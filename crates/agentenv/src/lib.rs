// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]
// Commands write their results to stdout and diagnostics to stderr
#![allow(clippy::print_stdout, clippy::print_stderr)]

//! agentenv - build-agent environment provisioning
//!
//! The binary is a thin wrapper around this library: [`cli`] defines the
//! command line and error mapping, [`commands`] runs each subcommand against
//! `agentenv-core`, and [`tracing`] configures structured logging.

pub mod cli;
pub mod commands;
pub mod tracing;
