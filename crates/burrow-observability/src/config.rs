//! Logging configuration

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Minimum level emitted when no filter directive overrides it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything
    Trace,
    /// Debugging detail
    Debug,
    /// Normal operation
    #[default]
    Info,
    /// Recoverable problems
    Warn,
    /// Failures only
    Error,
}

impl LogLevel {
    /// Level for a count of `-v` flags (0 = info)
    #[must_use]
    pub fn from_verbosity(verbosity: u8) -> Self {
        match verbosity {
            0 => Self::Info,
            1 => Self::Debug,
            _ => Self::Trace,
        }
    }

    /// Lowercase name, as understood by `EnvFilter`
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Console output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, human oriented
    Pretty,
    /// One line per event
    #[default]
    Compact,
    /// Newline-delimited JSON
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "unknown log format '{other}' (expected pretty, compact or json)"
            )),
        }
    }
}

/// How often the log file rolls over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationStrategy {
    /// New file every day
    #[default]
    Daily,
    /// New file every hour
    Hourly,
    /// Single file
    Never,
}

/// JSON log file output, in addition to the console
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLoggingConfig {
    /// Directory the files are written to
    pub directory: PathBuf,
    /// File name prefix
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Rotation cadence
    #[serde(default)]
    pub rotation: RotationStrategy,
}

fn default_prefix() -> String {
    "burrow.log".to_string()
}

/// Logging setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level
    pub level: LogLevel,
    /// Console format
    pub format: LogFormat,
    /// `EnvFilter` directives replacing `level` (e.g. `burrow_tunnel=debug,info`)
    pub filter_directives: Option<String>,
    /// Include the event target
    pub include_target: bool,
    /// Include file and line
    pub include_location: bool,
    /// Optional file output
    pub file: Option<FileLoggingConfig>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            filter_directives: None,
            include_target: true,
            include_location: false,
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    #[must_use]
    pub fn default_filter(&self) -> String {
        self.filter_directives
            .clone()
            .unwrap_or_else(|| self.level.as_str().to_string())
    }
}
