//! Logging configuration types.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::KumiError;

/// Logging configuration.
///
/// The level applies only when no `-v`/`-q` flag is given on the command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level.
    pub level: LogLevel,

    /// Log format.
    pub format: LogFormat,

    /// Log output destination.
    pub output: LogOutput,

    /// Log file path (when output = file).
    pub file_path: Option<String>,

    /// Extra `tracing` filter directives, e.g. `"reqwest=warn,hyper=warn"`.
    pub directives: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Text,
            output: LogOutput::Stderr,
            file_path: None,
            directives: None,
        }
    }
}

impl LoggingConfig {
    /// Builds the filter string handed to `EnvFilter`.
    ///
    /// The crate's own target gets `level`; dependencies stay one notch
    /// quieter unless overridden by `directives`.
    pub fn filter_directives(&self, level: LogLevel) -> String {
        let mut filter = format!("{},kumi={}", level.dependency_level(), level.as_str());
        if let Some(extra) = self.directives.as_deref().filter(|d| !d.trim().is_empty()) {
            filter.push(',');
            filter.push_str(extra.trim());
        }
        filter
    }
}

/// Log level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warn level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Returns the level name as understood by `EnvFilter`.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    fn dependency_level(&self) -> &'static str {
        match self {
            LogLevel::Trace => "debug",
            LogLevel::Debug | LogLevel::Info => "warn",
            LogLevel::Warn | LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = KumiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(KumiError::config(format!("Unknown log level: {}", s))),
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON lines.
    Json,
    /// Human readable text.
    #[default]
    Text,
}

/// Log output destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Standard output.
    Stdout,
    /// Standard error. Keeps stdout free for JSON command results.
    #[default]
    Stderr,
    /// File output.
    File,
}
