//! Configuration resolution for mcpipe.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Config file (`--config`, else the global `config.toml` when present)
//! 3. Environment variables and CLI arguments (highest priority, applied by
//!    the binary through [`Overrides`])

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Complete mcpipe configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub process: ProcessConfig,
    #[serde(default)]
    pub keepalive: KeepaliveConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Reconnect backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 600_000, // 10 minutes
        }
    }
}

/// Child process settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessConfig {
    /// Interpreter used to launch the child program (e.g. `python3`).
    pub interpreter: Option<PathBuf>,
    /// Seconds to wait for graceful child shutdown before SIGKILL.
    pub terminate_timeout_secs: u64,
    pub stderr_policy: StderrPolicy,
    pub diagnostic_sink: DiagnosticSinkKind,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            interpreter: None,
            terminate_timeout_secs: 5,
            stderr_policy: StderrPolicy::default(),
            diagnostic_sink: DiagnosticSinkKind::default(),
        }
    }
}

/// WebSocket keepalive settings. A zero interval disables pings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct KeepaliveConfig {
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval_secs: 20,
            timeout_secs: 20,
        }
    }
}

impl KeepaliveConfig {
    /// Ping interval and pong timeout, or `None` when keepalive is disabled.
    pub const fn durations(&self) -> Option<(Duration, Duration)> {
        if self.interval_secs == 0 {
            None
        } else {
            Some((
                Duration::from_secs(self.interval_secs),
                Duration::from_secs(self.timeout_secs),
            ))
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// What to do when the child closes its stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StderrPolicy {
    /// Treat stderr EOF as process death and tear the session down.
    #[default]
    Fatal,
    /// Log the closure and keep the session running.
    Ignore,
}

/// Where child stderr lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSinkKind {
    /// Copy lines verbatim to our own stderr.
    #[default]
    Stderr,
    /// Emit each line as a tracing event.
    Log,
}

impl FromStr for StderrPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fatal" => Ok(Self::Fatal),
            "ignore" => Ok(Self::Ignore),
            other => Err(Error::Config(format!(
                "unknown stderr policy '{other}' (expected 'fatal' or 'ignore')"
            ))),
        }
    }
}

impl fmt::Display for StderrPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fatal => "fatal",
            Self::Ignore => "ignore",
        })
    }
}

impl FromStr for DiagnosticSinkKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stderr" => Ok(Self::Stderr),
            "log" => Ok(Self::Log),
            other => Err(Error::Config(format!(
                "unknown diagnostic sink '{other}' (expected 'stderr' or 'log')"
            ))),
        }
    }
}

impl fmt::Display for DiagnosticSinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stderr => "stderr",
            Self::Log => "log",
        })
    }
}

/// Values supplied on the command line or through the environment.
///
/// Every field left as `None` keeps the value from the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub interpreter: Option<PathBuf>,
    pub terminate_timeout_secs: Option<u64>,
    pub stderr_policy: Option<StderrPolicy>,
    pub diagnostic_sink: Option<DiagnosticSinkKind>,
    pub keepalive_interval_secs: Option<u64>,
    pub keepalive_timeout_secs: Option<u64>,
    pub log_level: Option<String>,
    pub log_json: Option<bool>,
}

impl Config {
    /// Apply CLI/environment overrides on top of the file configuration.
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(v) = overrides.initial_backoff_ms {
            self.reconnect.initial_backoff_ms = v;
        }
        if let Some(v) = overrides.max_backoff_ms {
            self.reconnect.max_backoff_ms = v;
        }
        if overrides.interpreter.is_some() {
            self.process.interpreter = overrides.interpreter;
        }
        if let Some(v) = overrides.terminate_timeout_secs {
            self.process.terminate_timeout_secs = v;
        }
        if let Some(v) = overrides.stderr_policy {
            self.process.stderr_policy = v;
        }
        if let Some(v) = overrides.diagnostic_sink {
            self.process.diagnostic_sink = v;
        }
        if let Some(v) = overrides.keepalive_interval_secs {
            self.keepalive.interval_secs = v;
        }
        if let Some(v) = overrides.keepalive_timeout_secs {
            self.keepalive.timeout_secs = v;
        }
        if let Some(v) = overrides.log_level {
            self.logging.level = v;
        }
        if let Some(v) = overrides.log_json {
            self.logging.json = v;
        }
    }

    /// Reject settings the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.reconnect.initial_backoff_ms == 0 {
            return Err(Error::Config(
                "initial_backoff_ms must be greater than zero".into(),
            ));
        }
        if self.reconnect.initial_backoff_ms > self.reconnect.max_backoff_ms {
            return Err(Error::Config(format!(
                "initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.reconnect.initial_backoff_ms, self.reconnect.max_backoff_ms
            )));
        }
        if self.keepalive.interval_secs > 0 && self.keepalive.timeout_secs == 0 {
            return Err(Error::Config(
                "keepalive timeout_secs must be greater than zero when pings are enabled".into(),
            ));
        }
        Ok(())
    }
}

/// Load configuration with hierarchical resolution.
///
/// An explicitly requested file must exist; the global file is optional.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => load_config_file(path),
        None => match global_config_path() {
            Some(path) if path.exists() => load_config_file(&path),
            _ => Ok(Config::default()),
        },
    }
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("mcpipe").join("config.toml"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    toml::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}
