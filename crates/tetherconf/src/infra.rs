//! Infrastructure configuration - things that cannot change at runtime.

use serde::{Deserialize, Serialize};

/// Infrastructure settings, flattened into the top level of the config file.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct InfraConfig {
    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// HTTP bind address for the peer-facing server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BindConfig {
    /// Interface to listen on. The studio plugin polls from the same machine.
    /// Default: 127.0.0.1
    #[serde(default = "BindConfig::default_host")]
    pub host: String,

    /// HTTP port for poll, response and health endpoints.
    /// Default: 3002
    #[serde(default = "BindConfig::default_http_port")]
    pub http_port: u16,
}

impl BindConfig {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    fn default_http_port() -> u16 {
        3002
    }

    /// `host:port` string suitable for `TcpListener::bind`.
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

/// Telemetry and observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint for OpenTelemetry. Empty disables export.
    /// Default: "" (fmt logging only)
    #[serde(default)]
    pub otlp_endpoint: String,

    /// Log filter (trace, debug, info, warn, error, or an EnvFilter directive).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }

    /// OTLP endpoint if export is enabled.
    pub fn otlp(&self) -> Option<&str> {
        let endpoint = self.otlp_endpoint.trim();
        (!endpoint.is_empty()).then_some(endpoint)
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: String::new(),
            log_level: Self::default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otlp_disabled_when_blank() {
        let mut telemetry = TelemetryConfig::default();
        assert_eq!(telemetry.otlp(), None);

        telemetry.otlp_endpoint = "  ".to_string();
        assert_eq!(telemetry.otlp(), None);

        telemetry.otlp_endpoint = "localhost:4317".to_string();
        assert_eq!(telemetry.otlp(), Some("localhost:4317"));
    }

    #[test]
    fn bind_addr() {
        assert_eq!(BindConfig::default().addr(), "127.0.0.1:3002");
    }
}
