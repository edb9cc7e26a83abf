//! Logger construction from the `logging` configuration section.
//!
//! The library itself only emits records through the `log` facade. Front ends
//! call [`init_logging`] with the same [`LoggingSettings`] they hand to the
//! manager so that level, line format and destination follow configuration.

use std::fs::OpenOptions;
use std::io::Write;

use env_logger::{Builder, Target};
use log::{Level, LevelFilter};

use crate::config::LoggingSettings;
use crate::error::ManagerError;

/// Parses a level name as written in configuration.
///
/// Accepts `TRACE`, `DEBUG`, `INFO`, `WARN`/`WARNING`, `ERROR`, `CRITICAL`,
/// `OFF` and `NOTSET`, case-insensitively.
pub fn parse_level(name: &str) -> Result<LevelFilter, ManagerError> {
    match name.trim().to_ascii_uppercase().as_str() {
        "TRACE" | "NOTSET" => Ok(LevelFilter::Trace),
        "DEBUG" => Ok(LevelFilter::Debug),
        "INFO" => Ok(LevelFilter::Info),
        "WARN" | "WARNING" => Ok(LevelFilter::Warn),
        "ERROR" | "CRITICAL" => Ok(LevelFilter::Error),
        "OFF" => Ok(LevelFilter::Off),
        other => Err(ManagerError::InvalidConfig(format!(
            "unknown logging level '{other}'"
        ))),
    }
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARNING",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

/// Renders one log line from a `%(field)s` style format string.
///
/// Supported fields: `asctime`, `levelname`, `name` (the record target) and
/// `message`. Unknown fields are left as written.
pub fn render_line(format: &str, asctime: &str, level: Level, name: &str, message: &str) -> String {
    format
        .replace("%(asctime)s", asctime)
        .replace("%(levelname)s", level_name(level))
        .replace("%(name)s", name)
        .replace("%(message)s", message)
}

/// Builds a logger for `settings` without installing it.
///
/// `verbose` forces the `DEBUG` level regardless of configuration. When a log
/// file is configured its parent directory is created and records are
/// appended to it instead of stderr.
pub fn build_logger(settings: &LoggingSettings, verbose: bool) -> Result<Builder, ManagerError> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        parse_level(&settings.level)?
    };

    let mut builder = Builder::new();
    builder.filter_level(level);

    let format = settings.format.clone();
    builder.format(move |buf, record| {
        let asctime = buf.timestamp_millis().to_string();
        let message = record.args().to_string();
        writeln!(
            buf,
            "{}",
            render_line(&format, &asctime, record.level(), record.target(), &message)
        )
    });

    if let Some(path) = &settings.file {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    Ok(builder)
}

/// Builds and installs the process logger.
pub fn init_logging(settings: &LoggingSettings, verbose: bool) -> Result<(), ManagerError> {
    build_logger(settings, verbose)?
        .try_init()
        .map_err(|e| ManagerError::InvalidConfig(format!("logger already installed: {e}")))
}
