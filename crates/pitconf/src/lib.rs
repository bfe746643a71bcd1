//! Configuration loading for the pitwall telemetry service.
//!
//! # Usage
//!
//! ```rust,no_run
//! use pitconf::PitwallConfig;
//!
//! let config = PitwallConfig::load().expect("Failed to load config");
//! println!("Database: {}", config.paths.database_path().display());
//! println!("Listening on {}", config.bind.addr());
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, key by key):
//! 1. `/etc/pitwall/config.toml` (system)
//! 2. `~/.config/pitwall/config.toml` (user)
//! 3. `./pitwall.toml` (local override) or the path given with `--config`
//! 4. Environment variables (`PITWALL_*`, plus `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! state_dir = "~/.local/share/pitwall"
//! database = "~/.local/share/pitwall/telemetry.db"
//!
//! [bind]
//! host = "0.0.0.0"
//! http_port = 8080
//!
//! [telemetry]
//! log_level = "info,pitwall=debug"
//! otlp_endpoint = "http://127.0.0.1:4317"
//!
//! [ingest]
//! program = "ibt-parse"
//! args = ["--json"]
//! timeout_secs = 120
//! ```

pub mod loader;
pub mod sections;

pub use loader::{ConfigSources, discover_config_files_with_override};
pub use sections::{BindConfig, IngestConfig, PathsConfig, TelemetryConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PitwallConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub ingest: IngestConfig,
}

impl PitwallConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load with `config_path` replacing the local `./pitwall.toml` override.
    /// System and user configs still load first.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and variables contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let files = loader::discover_config_files_with_override(config_path);
        Self::load_files(&files)
    }

    /// Layer the given files in order, then apply environment overrides.
    pub fn load_files(files: &[PathBuf]) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in files {
            loader::merge_tables(&mut merged, loader::load_table(path)?);
            sources.files.push(path.clone());
        }

        let origin = sources
            .files
            .last()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("<defaults>"));
        let mut config = loader::from_table(merged, &origin)?;

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# Pitwall Configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!(
            "state_dir = {}\n",
            quote(&self.paths.state_dir.to_string_lossy())
        ));
        output.push_str(&format!(
            "database = {}\n",
            quote(&self.paths.database_path().to_string_lossy())
        ));

        output.push_str("\n[bind]\n");
        output.push_str(&format!("host = {}\n", quote(&self.bind.host)));
        output.push_str(&format!("http_port = {}\n", self.bind.http_port));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = {}\n", quote(&self.telemetry.log_level)));
        match &self.telemetry.otlp_endpoint {
            Some(endpoint) => output.push_str(&format!("otlp_endpoint = {}\n", quote(endpoint))),
            None => output.push_str("# otlp_endpoint = \"http://127.0.0.1:4317\"\n"),
        }

        output.push_str("\n[ingest]\n");
        output.push_str(&format!("program = {}\n", quote(&self.ingest.program)));
        let args: Vec<String> = self.ingest.args.iter().map(|a| quote(a)).collect();
        output.push_str(&format!("args = [{}]\n", args.join(", ")));
        output.push_str(&format!("timeout_secs = {}\n", self.ingest.timeout_secs));

        output
    }
}

fn quote(s: &str) -> String {
    toml::Value::String(s.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = PitwallConfig::default();
        assert_eq!(config.bind.http_port, 8080);
        assert_eq!(config.telemetry.log_level, "info,pitwall=debug");
        assert!(config.telemetry.otlp_endpoint.is_none());
    }

    #[test]
    fn test_to_toml_round_trips() {
        let mut config = PitwallConfig::default();
        config.ingest.args = vec!["--json".to_string(), "C:\\odd \"quoted\"".to_string()];
        config.telemetry.otlp_endpoint = Some("http://collector:4317".to_string());

        let text = config.to_toml();
        assert!(text.contains("[paths]"));
        assert!(text.contains("[ingest]"));

        let reparsed: PitwallConfig = toml::from_str(&text).unwrap();
        assert_eq!(reparsed.ingest.args, config.ingest.args);
        assert_eq!(reparsed.telemetry, config.telemetry);
        assert_eq!(reparsed.paths.database_path(), config.paths.database_path());
    }

    #[test]
    fn test_load_files_layers_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let system = dir.path().join("system.toml");
        let local = dir.path().join("local.toml");
        std::fs::write(&system, "[bind]\nhost = \"0.0.0.0\"\nhttp_port = 9000\n").unwrap();
        std::fs::write(&local, "[bind]\nhttp_port = 9100\n[ingest]\ntimeout_secs = 5\n").unwrap();

        let (config, sources) =
            PitwallConfig::load_files(&[system.clone(), local.clone()]).unwrap();
        assert_eq!(config.bind.host, "0.0.0.0");
        assert_eq!(config.ingest.timeout_secs, 5);
        assert_eq!(sources.files, vec![system, local]);
        // PITWALL_HTTP_PORT may be set in the environment running the tests
        if !sources.env_overrides.iter().any(|k| k == "PITWALL_HTTP_PORT") {
            assert_eq!(config.bind.http_port, 9100);
        }
    }

    #[test]
    fn test_unreadable_file_is_reported() {
        let missing = PathBuf::from("/nonexistent/pitwall/config.toml");
        let err = PitwallConfig::load_files(&[missing]).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[bind\nhttp_port = ").unwrap();
        let err = PitwallConfig::load_files(&[path.clone()]).unwrap_err();
        match err {
            ConfigError::Parse { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_defaults() {
        // Load should work even with no config files
        assert!(PitwallConfig::load().is_ok());
    }
}
