//! Configuration loading for tether.
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`InfraConfig`): bind address and telemetry. These
//!   cannot change once the process is serving.
//!
//! - **Bridge tuning** (`BridgeConfig`, `PollConfig`, `CacheConfig`): timeouts,
//!   liveness windows and long-poll bounds for the request correlation bridge.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/tether/config.toml` (system)
//! 2. `~/.config/tether/config.toml` (user)
//! 3. `./tether.toml` (local override, replaced by `--config` when given)
//! 4. Environment variables (`TETHER_*`)
//!
//! # Example Config
//!
//! ```toml
//! [bind]
//! host = "127.0.0.1"
//! http_port = 3002
//!
//! [bridge]
//! request_timeout_ms = 30000
//! peer_staleness_ms = 10000
//!
//! [poll]
//! max_wait_ms = 25000
//! max_batch = 50
//!
//! [cache]
//! ttl_ms = 5000
//! endpoints = ["/api/get-file-tree"]
//!
//! [telemetry]
//! otlp_endpoint = "127.0.0.1:4317"
//! log_level = "info"
//! ```

pub mod bridge;
pub mod infra;
pub mod loader;

pub use bridge::{BridgeConfig, CacheConfig, PollConfig};
pub use infra::{BindConfig, InfraConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};

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

    #[error("Invalid config value {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Complete tether configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TetherConfig {
    /// Infrastructure - fixed for the process lifetime.
    #[serde(flatten)]
    pub infra: InfraConfig,

    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

impl TetherConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, letting `config_path` replace `./tether.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and report where values came from.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::from_table(merged, Path::new("<merged>"))?;
        loader::apply_env_overrides(&mut config, &mut sources);
        config.validate()?;

        Ok((config, sources))
    }

    /// Timeouts, windows and periods must all be non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("bridge.request_timeout_ms", self.bridge.request_timeout_ms),
            ("bridge.sweep_interval_ms", self.bridge.sweep_interval_ms),
            ("bridge.peer_staleness_ms", self.bridge.peer_staleness_ms),
            ("poll.interval_ms", self.poll.interval_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    message: "must be greater than 0".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# tether configuration\n\n");

        output.push_str("[bind]\n");
        output.push_str(&format!("host = \"{}\"\n", self.infra.bind.host));
        output.push_str(&format!("http_port = {}\n", self.infra.bind.http_port));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "otlp_endpoint = \"{}\"\n",
            self.infra.telemetry.otlp_endpoint
        ));
        output.push_str(&format!(
            "log_level = \"{}\"\n",
            self.infra.telemetry.log_level
        ));

        output.push_str("\n[bridge]\n");
        output.push_str(&format!(
            "request_timeout_ms = {}\n",
            self.bridge.request_timeout_ms
        ));
        output.push_str(&format!(
            "sweep_interval_ms = {}\n",
            self.bridge.sweep_interval_ms
        ));
        output.push_str(&format!(
            "peer_staleness_ms = {}\n",
            self.bridge.peer_staleness_ms
        ));
        output.push_str(&format!(
            "dispatcher_active_on_start = {}\n",
            self.bridge.dispatcher_active_on_start
        ));

        output.push_str("\n[poll]\n");
        output.push_str(&format!("interval_ms = {}\n", self.poll.interval_ms));
        output.push_str(&format!("max_wait_ms = {}\n", self.poll.max_wait_ms));
        output.push_str(&format!("max_batch = {}\n", self.poll.max_batch));
        output.push_str(&format!("default_batch = {}\n", self.poll.default_batch));

        output.push_str("\n[cache]\n");
        output.push_str(&format!("ttl_ms = {}\n", self.cache.ttl_ms));
        let endpoints: Vec<String> = self
            .cache
            .endpoints
            .iter()
            .map(|e| format!("\"{}\"", e))
            .collect();
        output.push_str(&format!("endpoints = [{}]\n", endpoints.join(", ")));

        output
    }
}
