//! Configuration sections. Every field has a compiled default so a partial
//! file only overrides what it names.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem locations for service state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Base directory for runtime state.
    /// Default: ~/.local/share/pitwall
    #[serde(default = "PathsConfig::default_state_dir")]
    pub state_dir: PathBuf,

    /// SQLite database file. Defaults to `telemetry.db` under `state_dir`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
}

impl PathsConfig {
    fn default_state_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local/share/pitwall"))
            .unwrap_or_else(|| PathBuf::from(".local/share/pitwall"))
    }

    /// Effective database path.
    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.state_dir.join("telemetry.db"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: Self::default_state_dir(),
            database: None,
        }
    }
}

/// HTTP listener address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindConfig {
    /// Default: 127.0.0.1
    #[serde(default = "BindConfig::default_host")]
    pub host: String,

    /// Default: 8080
    #[serde(default = "BindConfig::default_http_port")]
    pub http_port: u16,
}

impl BindConfig {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    fn default_http_port() -> u16 {
        8080
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            http_port: Self::default_http_port(),
        }
    }
}

/// Logging and trace export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Filter directive for the log subscriber.
    /// Default: info,pitwall=debug
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,

    /// OTLP gRPC endpoint. Traces are only exported when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp_endpoint: Option<String>,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info,pitwall=debug".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            otlp_endpoint: None,
        }
    }
}

/// External recording parser.
///
/// The parser is run as `program [args...] <recording> <attributes-json>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Default: ibt-parse
    #[serde(default = "IngestConfig::default_program")]
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Default: 120
    #[serde(default = "IngestConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl IngestConfig {
    fn default_program() -> String {
        "ibt-parse".to_string()
    }

    fn default_timeout_secs() -> u64 {
        120
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            program: Self::default_program(),
            args: Vec::new(),
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}
