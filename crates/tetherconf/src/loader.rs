//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, TetherConfig};
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
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/tether/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("tether/config.toml");
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

    let local = PathBuf::from("tether.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a config file as a raw TOML table.
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

/// Load a single config file, filling unspecified values with defaults.
pub fn load_from_file(path: &Path) -> Result<TetherConfig, ConfigError> {
    let table = load_table(path)?;
    from_table(table, path)
}

/// Deserialize a (possibly merged) table into a config.
pub fn from_table(table: toml::Table, path: &Path) -> Result<TetherConfig, ConfigError> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Merge `overlay` into `base`, key by key. Nested tables merge recursively;
/// any other value in `overlay` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match value {
            toml::Value::Table(incoming) => {
                if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                    merge_tables(existing, incoming);
                    continue;
                }
                base.insert(key, toml::Value::Table(incoming));
            }
            value => {
                base.insert(key, value);
            }
        }
    }
}

fn parse_env<T: std::str::FromStr>(
    name: &str,
    sources: &mut ConfigSources,
    apply: impl FnOnce(T),
) {
    if let Ok(v) = env::var(name) {
        if let Ok(parsed) = v.parse() {
            apply(parsed);
            sources.env_overrides.push(name.to_string());
        }
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut TetherConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("TETHER_HOST") {
        config.infra.bind.host = v;
        sources.env_overrides.push("TETHER_HOST".to_string());
    }
    parse_env("TETHER_HTTP_PORT", sources, |port| {
        config.infra.bind.http_port = port
    });

    if let Ok(v) = env::var("TETHER_OTLP_ENDPOINT") {
        config.infra.telemetry.otlp_endpoint = v;
        sources.env_overrides.push("TETHER_OTLP_ENDPOINT".to_string());
    }
    // Also support standard OTEL env var
    if let Ok(v) = env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.infra.telemetry.otlp_endpoint = v;
        sources
            .env_overrides
            .push("OTEL_EXPORTER_OTLP_ENDPOINT".to_string());
    }
    if let Ok(v) = env::var("TETHER_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("TETHER_LOG_LEVEL".to_string());
    }
    if let Ok(v) = env::var("RUST_LOG") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }

    parse_env("TETHER_REQUEST_TIMEOUT_MS", sources, |ms| {
        config.bridge.request_timeout_ms = ms
    });
    parse_env("TETHER_PEER_STALENESS_MS", sources, |ms| {
        config.bridge.peer_staleness_ms = ms
    });
    parse_env("TETHER_POLL_MAX_WAIT_MS", sources, |ms| {
        config.poll.max_wait_ms = ms
    });
    parse_env("TETHER_POLL_MAX_BATCH", sources, |n| config.poll.max_batch = n);
    parse_env("TETHER_CACHE_TTL_MS", sources, |ms| config.cache.ttl_ms = ms);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> TetherConfig {
        from_table(toml.parse().unwrap(), Path::new("test.toml")).unwrap()
    }

    #[test]
    fn test_discover_config_files() {
        let _files = discover_config_files();
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = parse(
            r#"
[bind]
http_port = 4000
"#,
        );
        assert_eq!(config.infra.bind.http_port, 4000);
        assert_eq!(config.infra.bind.host, "127.0.0.1");
        assert_eq!(config.bridge.request_timeout_ms, 30_000);
    }

    #[test]
    fn test_parse_full_toml() {
        let config = parse(
            r#"
[bind]
host = "0.0.0.0"
http_port = 9000

[telemetry]
otlp_endpoint = "collector:4317"
log_level = "debug"

[bridge]
request_timeout_ms = 10000
sweep_interval_ms = 1000
peer_staleness_ms = 2000
dispatcher_active_on_start = false

[poll]
interval_ms = 20
max_wait_ms = 5000
max_batch = 10
default_batch = 2

[cache]
ttl_ms = 250
endpoints = ["/api/file-tree", "/api/services"]
"#,
        );

        assert_eq!(config.infra.bind.addr(), "0.0.0.0:9000");
        assert_eq!(config.infra.telemetry.otlp(), Some("collector:4317"));
        assert_eq!(config.infra.telemetry.log_level, "debug");
        assert_eq!(config.bridge.request_timeout_ms, 10_000);
        assert!(!config.bridge.dispatcher_active_on_start);
        assert_eq!(config.poll.max_batch, 10);
        assert_eq!(config.poll.default_batch, 2);
        assert!(config.cache.enabled());
        assert_eq!(config.cache.endpoints.len(), 2);
    }

    #[test]
    fn test_parse_rejects_wrong_types() {
        let table: toml::Table = "[bind]\nhttp_port = \"not a port\"\n".parse().unwrap();
        let err = from_table(table, Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_merge_overlay_wins_per_key() {
        let mut base: toml::Table = r#"
[bind]
host = "0.0.0.0"
http_port = 9000
"#
        .parse()
        .unwrap();
        let overlay: toml::Table = r#"
[bind]
http_port = 9100

[poll]
max_batch = 3
"#
        .parse()
        .unwrap();

        merge_tables(&mut base, overlay);
        let config = from_table(base, Path::new("merged")).unwrap();
        assert_eq!(config.infra.bind.host, "0.0.0.0");
        assert_eq!(config.infra.bind.http_port, 9100);
        assert_eq!(config.poll.max_batch, 3);
    }

    #[test]
    fn test_parse_env_records_source_and_skips_garbage() {
        let mut sources = ConfigSources::default();
        let mut port: u16 = 0;

        env::set_var("TETHER_TEST_ONLY_PORT", "4100");
        parse_env("TETHER_TEST_ONLY_PORT", &mut sources, |p| port = p);
        assert_eq!(port, 4100);
        assert_eq!(sources.env_overrides, vec!["TETHER_TEST_ONLY_PORT"]);

        env::set_var("TETHER_TEST_ONLY_PORT", "not-a-port");
        parse_env("TETHER_TEST_ONLY_PORT", &mut sources, |p: u16| port = p);
        assert_eq!(port, 4100);
        assert_eq!(sources.env_overrides.len(), 1);

        env::remove_var("TETHER_TEST_ONLY_PORT");
    }

    #[test]
    fn test_load_from_file_missing() {
        let err = load_from_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }
}
