//! Tests for error types

use agentenv_core::Error;
use miette::Diagnostic;
use std::path::Path;

#[test]
fn test_network_error() {
    let error = Error::network("https://dlcdn.apache.org/maven", "connection refused");
    assert_eq!(
        error.to_string(),
        "Network error fetching https://dlcdn.apache.org/maven: connection refused"
    );
    assert_eq!(error.kind(), "network");
    assert!(error.help().is_some());
}

#[test]
fn test_integrity_error() {
    let error = Error::integrity("maven", "sha512:aa", "sha512:bb");
    assert_eq!(
        error.to_string(),
        "Integrity check failed for 'maven': expected sha512:aa, got sha512:bb"
    );
    assert_eq!(error.kind(), "integrity");
}

#[test]
fn test_configuration_error() {
    let error = Error::configuration("Tool 'mvn' reports version 3.8.1, expected 3.9.6");
    assert_eq!(
        error.to_string(),
        "Configuration error: Tool 'mvn' reports version 3.8.1, expected 3.9.6"
    );
    assert!(error.help().is_none());

    let error = Error::configuration_with_help("ambiguous claim", "set precedence");
    assert_eq!(error.help().map(|h| h.to_string()).as_deref(), Some("set precedence"));
}

#[test]
fn test_permission_error() {
    let error = Error::permission("/home/jenkins", "Operation not permitted");
    assert_eq!(
        error.to_string(),
        "Permission error on /home/jenkins: Operation not permitted"
    );
    assert_eq!(error.kind(), "permission");
}

#[test]
fn test_validation_error() {
    let error = Error::validation("tool 'maven' is declared more than once");
    assert_eq!(
        error.to_string(),
        "Validation failed: tool 'maven' is declared more than once"
    );
}

#[test]
fn test_io_error() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
    let error = Error::io(io, Path::new("/opt/maven"), "read receipt");
    assert_eq!(error.to_string(), "I/O read receipt failed on /opt/maven: missing");
    assert_eq!(error.kind(), "io");

    let error: Error = std::io::Error::other("boom").into();
    assert!(error.to_string().starts_with("I/O operation failed"));
}

#[test]
fn test_diagnostic_codes() {
    let error = Error::platform("operating system 'windows'");
    assert_eq!(
        error.code().map(|c| c.to_string()).as_deref(),
        Some("agentenv::platform")
    );
}
