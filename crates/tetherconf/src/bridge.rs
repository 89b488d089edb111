//! Bridge tuning - timeouts, liveness windows and long-poll bounds.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request ledger and liveness settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    /// How long a submitted request may wait for the peer before it is
    /// rejected with a timeout.
    /// Default: 30000 (30s)
    #[serde(default = "BridgeConfig::default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Period of the reaper sweep that backs up the per-request timers.
    /// Default: 5000
    #[serde(default = "BridgeConfig::default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// The peer counts as connected only if it was seen within this window.
    /// Default: 10000
    #[serde(default = "BridgeConfig::default_peer_staleness_ms")]
    pub peer_staleness_ms: u64,

    /// Mark the in-process dispatcher active as soon as the server starts.
    /// Default: true
    #[serde(default = "BridgeConfig::default_dispatcher_active_on_start")]
    pub dispatcher_active_on_start: bool,
}

impl BridgeConfig {
    fn default_request_timeout_ms() -> u64 {
        30_000
    }

    fn default_sweep_interval_ms() -> u64 {
        5_000
    }

    fn default_peer_staleness_ms() -> u64 {
        10_000
    }

    fn default_dispatcher_active_on_start() -> bool {
        true
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn peer_staleness(&self) -> Duration {
        Duration::from_millis(self.peer_staleness_ms)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: Self::default_request_timeout_ms(),
            sweep_interval_ms: Self::default_sweep_interval_ms(),
            peer_staleness_ms: Self::default_peer_staleness_ms(),
            dispatcher_active_on_start: Self::default_dispatcher_active_on_start(),
        }
    }
}

/// Long-poll bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollConfig {
    /// Re-check interval while a long poll is waiting.
    /// Default: 50
    #[serde(default = "PollConfig::default_interval_ms")]
    pub interval_ms: u64,

    /// Hard ceiling on `maxWait`, whatever the peer asks for.
    /// Default: 30000
    #[serde(default = "PollConfig::default_max_wait_ms")]
    pub max_wait_ms: u64,

    /// Hard ceiling on `maxBatch`.
    /// Default: 50
    #[serde(default = "PollConfig::default_max_batch")]
    pub max_batch: usize,

    /// Batch size used when the peer omits `maxBatch`.
    /// Default: 5
    #[serde(default = "PollConfig::default_default_batch")]
    pub default_batch: usize,
}

impl PollConfig {
    fn default_interval_ms() -> u64 {
        50
    }

    fn default_max_wait_ms() -> u64 {
        30_000
    }

    fn default_max_batch() -> usize {
        50
    }

    fn default_default_batch() -> usize {
        5
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: Self::default_interval_ms(),
            max_wait_ms: Self::default_max_wait_ms(),
            max_batch: Self::default_max_batch(),
            default_batch: Self::default_default_batch(),
        }
    }
}

/// Result cache for read-only endpoints. `ttl_ms = 0` disables caching.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CacheConfig {
    #[serde(default)]
    pub ttl_ms: u64,

    /// Endpoints whose successful results may be served from the cache.
    #[serde(default)]
    pub endpoints: Vec<String>,
}

impl CacheConfig {
    pub fn enabled(&self) -> bool {
        self.ttl_ms > 0 && !self.endpoints.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}
