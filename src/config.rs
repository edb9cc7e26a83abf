//! Configuration loading for the Bluetooth manager.
//!
//! Configuration is a YAML document with one profile per channel under the
//! `bluetooth_manager` key. The `default` channel is always loaded; a named
//! channel replaces the default's top-level keys with its own.
//!
//! ```yaml
//! bluetooth_manager:
//!   default:
//!     bluetoothctl_path: /usr/bin/bluetoothctl
//!     max_connections: 3
//!     scan: { duration: 5, timeout_seconds: 10, device_regex: 'Device (\S+) (.+)' }
//!     connection: { response_timeout: 10, expected_response: "Connection successful" }
//!     list: { device_regex: 'Device (\S+) (.+)' }
//!     logging: { level: INFO, format: "%(levelname)s %(message)s" }
//!     "scan on": { timeout_seconds: 5 }
//!   studio:
//!     max_connections: 1
//! ```
//!
//! Any other top-level key is a per-command timeout override named after the
//! exact command text.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::device::{DevicePattern, ResponseCheck};
use crate::error::ManagerError;

/// Environment variable that may point to an alternate configuration file.
pub const CONFIG_ENV_VAR: &str = "BLUETOOTH_MANAGER_CONFIG";

/// Configuration file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "config.yaml";

/// Configuration shipped with the crate, used when no file is found.
pub const BUNDLED_CONFIG: &str = include_str!("../config/default.yaml");

/// Name of the channel every other channel is merged over.
pub const DEFAULT_CHANNEL: &str = "default";

const ROOT_KEY: &str = "bluetooth_manager";

/// Resolved settings for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the control tool executable.
    pub bluetoothctl_path: String,
    /// Upper bound on concurrent connect attempts per round.
    pub max_connections: usize,
    pub scan: ScanSettings,
    pub connection: ConnectionSettings,
    pub list: ListSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Per-command timeout overrides keyed by exact command text.
    #[serde(flatten)]
    pub overrides: BTreeMap<String, CommandOverride>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Seconds to keep scanning before listing devices.
    pub duration: f64,
    /// Default timeout in seconds for any command without an override.
    pub timeout_seconds: f64,
    pub device_regex: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Timeout in seconds for a single `connect` command.
    pub response_timeout: f64,
    /// Substring of a successful `connect` reply.
    pub expected_response: String,
    /// Regex checked instead of `expected_response` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListSettings {
    pub device_regex: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOverride {
    pub timeout_seconds: f64,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_log_format() -> String {
    "%(asctime)s - %(name)s - %(levelname)s - %(message)s".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            file: None,
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for Settings {
    /// Mirrors the `default` channel of the bundled configuration.
    fn default() -> Self {
        let device_regex = r"Device ((?:[0-9A-F]{2}:){5}[0-9A-F]{2}) (.+)".to_string();
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "scan on".to_string(),
            CommandOverride {
                timeout_seconds: 5.0,
            },
        );
        overrides.insert(
            "scan off".to_string(),
            CommandOverride {
                timeout_seconds: 5.0,
            },
        );

        Self {
            bluetoothctl_path: "/usr/bin/bluetoothctl".to_string(),
            max_connections: 3,
            scan: ScanSettings {
                duration: 5.0,
                timeout_seconds: 10.0,
                device_regex: device_regex.clone(),
            },
            connection: ConnectionSettings {
                response_timeout: 10.0,
                expected_response: "Connection successful".to_string(),
                expected_pattern: None,
            },
            list: ListSettings { device_regex },
            logging: LoggingSettings::default(),
            overrides,
        }
    }
}

/// Where the configuration was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Bundled,
}

/// Per-command timeouts resolved once from [`Settings`].
#[derive(Debug, Clone)]
pub struct CommandTimeouts {
    default: Duration,
    overrides: HashMap<String, Duration>,
}

impl CommandTimeouts {
    pub fn new(default: Duration, overrides: HashMap<String, Duration>) -> Self {
        Self { default, overrides }
    }

    /// Effective timeout: explicit value, else the command's override, else the default.
    pub fn resolve(&self, command: &str, explicit: Option<Duration>) -> Duration {
        explicit
            .or_else(|| self.overrides.get(command).copied())
            .unwrap_or(self.default)
    }
}

impl Settings {
    /// Checks value ranges and that every pattern compiles.
    pub fn validate(&self) -> Result<(), ManagerError> {
        if self.max_connections == 0 {
            return Err(ManagerError::InvalidConfig(
                "max_connections must be greater than 0".to_string(),
            ));
        }
        if self.bluetoothctl_path.trim().is_empty() {
            return Err(ManagerError::InvalidConfig(
                "bluetoothctl_path must not be empty".to_string(),
            ));
        }
        self.scan_duration()?;
        self.command_timeouts()?;
        self.connection_timeout()?;
        self.scan_pattern()?;
        self.list_pattern()?;
        self.response_check()?;
        Ok(())
    }

    pub fn scan_duration(&self) -> Result<Duration, ManagerError> {
        seconds("scan.duration", self.scan.duration)
    }

    pub fn connection_timeout(&self) -> Result<Duration, ManagerError> {
        seconds("connection.response_timeout", self.connection.response_timeout)
    }

    pub fn command_timeouts(&self) -> Result<CommandTimeouts, ManagerError> {
        let default = seconds("scan.timeout_seconds", self.scan.timeout_seconds)?;
        let overrides = self
            .overrides
            .iter()
            .map(|(command, over)| {
                seconds(&format!("{command}.timeout_seconds"), over.timeout_seconds)
                    .map(|timeout| (command.clone(), timeout))
            })
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(CommandTimeouts::new(default, overrides))
    }

    pub fn scan_pattern(&self) -> Result<DevicePattern, ManagerError> {
        DevicePattern::new(&self.scan.device_regex)
    }

    pub fn list_pattern(&self) -> Result<DevicePattern, ManagerError> {
        DevicePattern::new(&self.list.device_regex)
    }

    pub fn response_check(&self) -> Result<ResponseCheck, ManagerError> {
        match &self.connection.expected_pattern {
            Some(pattern) => ResponseCheck::matches(pattern),
            None => Ok(ResponseCheck::contains(
                self.connection.expected_response.clone(),
            )),
        }
    }
}

fn seconds(name: &str, value: f64) -> Result<Duration, ManagerError> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        ManagerError::InvalidConfig(format!(
            "{name} must be a finite, non-negative number of seconds (got {value})"
        ))
    })
}

/// Loads settings for `channel`.
///
/// The file is located with [`get_config_path`]; the bundled configuration
/// is used when no file is found.
pub fn load_config(config_path: Option<&Path>, channel: &str) -> Result<Settings, ManagerError> {
    let source = get_config_path(config_path)?;
    let text = match &source {
        ConfigSource::File(path) => {
            debug!("Loading configuration from {}", path.display());
            std::fs::read_to_string(path).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ManagerError::ConfigNotFound(path.clone()),
                _ => ManagerError::Io(e),
            })?
        }
        ConfigSource::Bundled => {
            debug!("Loading bundled configuration");
            BUNDLED_CONFIG.to_string()
        }
    };
    settings_from_yaml(&text, channel)
}

/// Locates the configuration file.
///
/// Order: explicit path (must exist), then `BLUETOOTH_MANAGER_CONFIG`, then
/// `config.yaml` in the working directory, then the bundled default.
pub fn get_config_path(config_path: Option<&Path>) -> Result<ConfigSource, ManagerError> {
    resolve_config_path(
        config_path,
        std::env::var_os(CONFIG_ENV_VAR),
        Path::new(LOCAL_CONFIG_FILE),
    )
}

fn resolve_config_path(
    explicit: Option<&Path>,
    from_env: Option<OsString>,
    local: &Path,
) -> Result<ConfigSource, ManagerError> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(ConfigSource::File(path.to_path_buf()));
        }
        return Err(ManagerError::ConfigNotFound(path.to_path_buf()));
    }

    if let Some(path) = from_env.map(PathBuf::from) {
        if path.exists() {
            return Ok(ConfigSource::File(path));
        }
        warn!(
            "Configuration file from `{}` not found at {}",
            CONFIG_ENV_VAR,
            path.display()
        );
    }

    if local.exists() {
        return Ok(ConfigSource::File(local.to_path_buf()));
    }

    warn!("No configuration file found. Using default configuration.");
    Ok(ConfigSource::Bundled)
}

/// Parses a configuration document and merges `channel` over `default`.
pub fn settings_from_yaml(text: &str, channel: &str) -> Result<Settings, ManagerError> {
    let document: Value =
        serde_yaml::from_str(text).map_err(|e| ManagerError::ConfigParse(e.to_string()))?;

    let root = document
        .get(ROOT_KEY)
        .and_then(Value::as_mapping)
        .ok_or_else(|| ManagerError::ConfigParse(format!("missing `{ROOT_KEY}` section")))?;

    let mut merged: Mapping = root
        .get(DEFAULT_CHANNEL)
        .and_then(Value::as_mapping)
        .cloned()
        .ok_or_else(|| ManagerError::MissingChannel(DEFAULT_CHANNEL.to_string()))?;

    if channel != DEFAULT_CHANNEL {
        let overlay = root
            .get(channel)
            .and_then(Value::as_mapping)
            .ok_or_else(|| ManagerError::MissingChannel(channel.to_string()))?;
        for (key, value) in overlay {
            merged.insert(key.clone(), value.clone());
        }
    }

    let settings: Settings = serde_yaml::from_value(Value::Mapping(merged))
        .map_err(|e| ManagerError::ConfigParse(e.to_string()))?;
    settings.validate()?;
    Ok(settings)
}
