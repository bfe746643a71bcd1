//! Config file discovery, layering, and environment variable overlay.

use crate::{ConfigError, PitwallConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/pitwall/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("pitwall/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("pitwall.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file into a raw table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents
        .parse()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Merge `overlay` into `base`. Nested tables merge key by key; every other
/// value in `overlay` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Build a config from a merged table. Missing keys fall back to defaults.
pub fn from_table(table: toml::Table, origin: &Path) -> Result<PitwallConfig, ConfigError> {
    let mut config: PitwallConfig =
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?;

    config.paths.state_dir = expand_path(&config.paths.state_dir.to_string_lossy());
    config.paths.database = config
        .paths
        .database
        .as_deref()
        .map(|p| expand_path(&p.to_string_lossy()));

    Ok(config)
}

/// Apply `PITWALL_*` environment overrides to config.
pub fn apply_env_overrides(config: &mut PitwallConfig, sources: &mut ConfigSources) {
    apply_overrides_with(config, sources, |key| env::var(key).ok());
}

/// Apply overrides from any key lookup. `lookup` returns `None` for unset keys.
pub fn apply_overrides_with<F>(config: &mut PitwallConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = read(&lookup, sources, "PITWALL_STATE_DIR") {
        config.paths.state_dir = expand_path(&v);
    }
    if let Some(v) = read(&lookup, sources, "PITWALL_DATABASE") {
        config.paths.database = Some(expand_path(&v));
    }

    if let Some(v) = read(&lookup, sources, "PITWALL_HOST") {
        config.bind.host = v;
    }
    if let Some(port) = read_parsed(&lookup, sources, "PITWALL_HTTP_PORT") {
        config.bind.http_port = port;
    }

    if let Some(v) = read(&lookup, sources, "PITWALL_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = Some(v);
    }
    // Standard OTEL variable wins over ours
    if let Some(v) = read(&lookup, sources, "OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = Some(v);
    }
    if let Some(v) = read(&lookup, sources, "PITWALL_LOG_LEVEL") {
        config.telemetry.log_level = v;
    }
    if let Some(v) = read(&lookup, sources, "RUST_LOG") {
        config.telemetry.log_level = v;
    }

    if let Some(v) = read(&lookup, sources, "PITWALL_INGEST_PROGRAM") {
        config.ingest.program = v;
    }
    if let Some(v) = read(&lookup, sources, "PITWALL_INGEST_ARGS") {
        config.ingest.args = v.split_whitespace().map(str::to_string).collect();
    }
    if let Some(secs) = read_parsed(&lookup, sources, "PITWALL_INGEST_TIMEOUT_SECS") {
        config.ingest.timeout_secs = secs;
    }
}

fn read<F>(lookup: &F, sources: &mut ConfigSources, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key)?;
    sources.env_overrides.push(key.to_string());
    Some(value)
}

/// Like [`read`], but values that fail to parse are ignored and not recorded.
fn read_parsed<F, T>(lookup: &F, sources: &mut ConfigSources, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let value = lookup(key)?.parse().ok()?;
    sources.env_overrides.push(key.to_string());
    Some(value)
}

/// Expand `~/` and a leading `$VAR/` in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        return directories::BaseDirs::new()
            .map(|d| d.home_dir().join(stripped))
            .unwrap_or_else(|| PathBuf::from(path));
    }

    if let Some(stripped) = path.strip_prefix('$') {
        let (var_name, rest) = match stripped.find('/') {
            Some(slash) => (&stripped[..slash], Some(&stripped[slash + 1..])),
            None => (stripped, None),
        };
        return match (env::var(var_name), rest) {
            (Ok(value), Some(rest)) => PathBuf::from(value).join(rest),
            (Ok(value), None) => PathBuf::from(value),
            (Err(_), _) => PathBuf::from(path),
        };
    }

    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn parse(toml: &str) -> PitwallConfig {
        from_table(toml.parse().unwrap(), Path::new("test.toml")).unwrap()
    }

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/test/path");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().ends_with("test/path"));
    }

    #[test]
    fn test_expand_path_absolute() {
        assert_eq!(expand_path("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_path_unknown_var_kept() {
        let raw = "$PITWALL_SURELY_UNSET_VAR/data";
        assert_eq!(expand_path(raw), PathBuf::from(raw));
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = parse(
            r#"
[paths]
state_dir = "/custom/state"
"#,
        );
        assert_eq!(config.paths.state_dir, PathBuf::from("/custom/state"));
        assert_eq!(config.bind.http_port, 8080);
        assert_eq!(config.ingest.program, "ibt-parse");
    }

    #[test]
    fn test_parse_full_toml() {
        let config = parse(
            r#"
[paths]
state_dir = "/data/pitwall"
database = "/data/pitwall/laps.db"

[bind]
host = "0.0.0.0"
http_port = 9000

[telemetry]
log_level = "debug"
otlp_endpoint = "http://127.0.0.1:4317"

[ingest]
program = "/usr/local/bin/ibt2json"
args = ["--compact"]
timeout_secs = 30
"#,
        );

        assert_eq!(config.paths.database_path(), PathBuf::from("/data/pitwall/laps.db"));
        assert_eq!(config.bind.addr(), "0.0.0.0:9000");
        assert_eq!(config.telemetry.log_level, "debug");
        assert_eq!(
            config.telemetry.otlp_endpoint.as_deref(),
            Some("http://127.0.0.1:4317")
        );
        assert_eq!(config.ingest.args, vec!["--compact"]);
        assert_eq!(config.ingest.timeout_secs, 30);
    }

    #[test]
    fn test_later_tables_override_key_by_key() {
        let mut merged: toml::Table = r#"
[bind]
host = "0.0.0.0"
http_port = 9000
"#
        .parse()
        .unwrap();
        let overlay: toml::Table = r#"
[bind]
http_port = 9100
"#
        .parse()
        .unwrap();
        merge_tables(&mut merged, overlay);

        let config = from_table(merged, Path::new("merged")).unwrap();
        assert_eq!(config.bind.host, "0.0.0.0");
        assert_eq!(config.bind.http_port, 9100);
    }

    #[test]
    fn test_wrong_type_is_parse_error() {
        let table: toml::Table = "[bind]\nhttp_port = \"eighty\"\n".parse().unwrap();
        let err = from_table(table, Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PITWALL_HTTP_PORT", "7000"),
            ("PITWALL_DATABASE", "/tmp/env.db"),
            ("PITWALL_INGEST_ARGS", "--fast  --quiet"),
            ("PITWALL_INGEST_TIMEOUT_SECS", "not-a-number"),
            ("RUST_LOG", "warn"),
        ]
        .into_iter()
        .collect();

        let mut config = PitwallConfig::default();
        let mut sources = ConfigSources::default();
        apply_overrides_with(&mut config, &mut sources, |key| {
            vars.get(key).map(|v| v.to_string())
        });

        assert_eq!(config.bind.http_port, 7000);
        assert_eq!(config.paths.database_path(), PathBuf::from("/tmp/env.db"));
        assert_eq!(config.ingest.args, vec!["--fast", "--quiet"]);
        assert_eq!(config.ingest.timeout_secs, 120);
        assert_eq!(config.telemetry.log_level, "warn");
        assert_eq!(
            sources.env_overrides,
            vec![
                "PITWALL_DATABASE",
                "PITWALL_HTTP_PORT",
                "RUST_LOG",
                "PITWALL_INGEST_ARGS"
            ]
        );
    }
}
