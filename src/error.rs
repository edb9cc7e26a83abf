//! Error types for bluetoothctl command execution and configuration.
//!
//! This module defines all errors that can occur while spawning the control
//! tool, waiting for its output, compiling configured patterns, and loading
//! configuration files.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while managing Bluetooth devices.
#[derive(Error, Debug)]
pub enum ManagerError {
    /// The control tool could not be started or its stdin could not be opened.
    #[error("failed to start control tool for '{command}': {reason}")]
    Startup { command: String, reason: String },

    /// The control tool exited in time but wrote diagnostics to stderr.
    ///
    /// The captured stderr text is kept verbatim in `errors`.
    #[error("error executing command '{command}' (errors: {errors})")]
    Execution { command: String, errors: String },

    /// The control tool did not finish within its timeout and was killed.
    ///
    /// `errors` holds whatever stderr text was captured before the kill.
    #[error(
        "command timeout: '{command}' did not respond in time (errors: {})",
        .errors.as_deref().unwrap_or("none")
    )]
    Timeout {
        command: String,
        errors: Option<String>,
    },

    /// A configured device or response pattern is not a valid regex.
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// No configuration file exists at the requested location.
    #[error("configuration file not found at {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file is not valid YAML or has the wrong shape.
    #[error("error parsing the configuration file: {0}")]
    ConfigParse(String),

    /// The requested channel is not present in the configuration file.
    #[error("configuration channel '{0}' not found")]
    MissingChannel(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ManagerError {
    /// The command text that triggered the error, for command-level failures.
    pub fn command(&self) -> Option<&str> {
        match self {
            ManagerError::Startup { command, .. }
            | ManagerError::Execution { command, .. }
            | ManagerError::Timeout { command, .. } => Some(command),
            _ => None,
        }
    }

    /// Diagnostic text captured from the control tool, if any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            ManagerError::Startup { reason, .. } => Some(reason),
            ManagerError::Execution { errors, .. } => Some(errors),
            ManagerError::Timeout { errors, .. } => errors.as_deref(),
            _ => None,
        }
    }
}
