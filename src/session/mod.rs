//! bluetoothctl command execution and device connection management.
//!
//! This module drives the external control tool one process per command,
//! schedules bounded concurrent connection rounds, and sequences the
//! discovery workflow on top of them.
//!
//! # Main Components
//!
//! - [`CommandRunner`] - Capability to run one command against the control tool
//! - [`ToolExecutor`] - Process-per-command runner with timeout and kill handling
//! - [`ConnectionScheduler`] - Bounded pool issuing `connect` commands per round
//! - [`BluetoothManager`] - Discovery, listing, and connection workflow

use async_trait::async_trait;
use log::{debug, error, info, trace};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::{CommandTimeouts, Settings};
use crate::device::{Device, DevicePattern, ResponseCheck};
use crate::error::ManagerError;

pub use executor::ToolExecutor;
pub use manager::{BluetoothManager, pending_connections};
pub use scheduler::{AttemptOutcome, ConnectionAttempt, ConnectionScheduler, RoundReport};

/// Starts device discovery.
pub const SCAN_ON: &str = "scan on";
/// Stops device discovery.
pub const SCAN_OFF: &str = "scan off";
/// Lists every device the tool knows about.
pub const LIST_DEVICES: &str = "devices";
/// Lists currently connected devices.
pub const LIST_CONNECTED: &str = "devices Connected";
/// Disconnects every connected device.
pub const DISCONNECT_ALL: &str = "disconnect";
/// Line that ends the tool's interactive session.
pub const EXIT_COMMAND: &str = "exit";

/// Command text for connecting to `address`.
pub fn connect_command(address: &str) -> String {
    format!("connect {address}")
}

/// One command to run against the control tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Command text written to the tool's stdin.
    pub text: String,
    /// Effective timeout after override resolution.
    pub timeout: Duration,
}

/// Lifecycle of a single command process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Idle,
    Spawned,
    Writing,
    AwaitingCompletion,
    Completed,
    TimedOut,
    ErrorReported,
    Terminated,
}

impl fmt::Display for ExecState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecState::Idle => "idle",
            ExecState::Spawned => "spawned",
            ExecState::Writing => "writing",
            ExecState::AwaitingCompletion => "awaiting_completion",
            ExecState::Completed => "completed",
            ExecState::TimedOut => "timed_out",
            ExecState::ErrorReported => "error_reported",
            ExecState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Access to the control tool.
///
/// Every command is an independent request. Implementations must not keep
/// a process alive after `execute` returns.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `command`, returning its standard output.
    ///
    /// `timeout` overrides the configured timeout for this command.
    async fn execute(&self, command: &str, timeout: Option<Duration>)
    -> Result<String, ManagerError>;
}

mod executor;
mod manager;
mod scheduler;
