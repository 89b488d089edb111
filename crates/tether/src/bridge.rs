//! The request correlation bridge: ledger, liveness and coordinator wired
//! together.
//!
//! One `Bridge` is built at the composition root and shared as `Arc` with the
//! HTTP handlers and the dispatcher. Tests build as many isolated instances
//! as they like.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::coordinator::{Coordinator, PollLimits};
use crate::ledger::{Ledger, LedgerStats};
use crate::liveness::{ConnectionTracker, LivenessSnapshot};
use crate::reaper::spawn_reaper;

#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub request_timeout: Duration,
    pub sweep_interval: Duration,
    pub peer_staleness: Duration,
    pub poll: PollLimits,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
            peer_staleness: Duration::from_secs(10),
            poll: PollLimits::default(),
        }
    }
}

impl From<&tetherconf::TetherConfig> for BridgeOptions {
    fn from(config: &tetherconf::TetherConfig) -> Self {
        Self {
            request_timeout: config.bridge.request_timeout(),
            sweep_interval: config.bridge.sweep_interval(),
            peer_staleness: config.bridge.peer_staleness(),
            poll: PollLimits::from(&config.poll),
        }
    }
}

/// Diagnostic snapshot served on `/status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    #[serde(flatten)]
    pub liveness: LivenessSnapshot,
    pub pending_requests: usize,
    pub uptime_secs: u64,
    pub ledger: LedgerStats,
}

pub struct Bridge {
    ledger: Ledger,
    liveness: Arc<ConnectionTracker>,
    coordinator: Coordinator,
    shutdown: CancellationToken,
    options: BridgeOptions,
    start_time: Instant,
}

impl Bridge {
    pub fn new(options: BridgeOptions) -> Arc<Self> {
        let ledger = Ledger::new(options.request_timeout);
        let liveness = Arc::new(ConnectionTracker::new(options.peer_staleness));
        let shutdown = CancellationToken::new();
        let coordinator = Coordinator::new(
            ledger.clone(),
            Arc::clone(&liveness),
            options.poll.clone(),
            shutdown.clone(),
        );

        Arc::new(Self {
            ledger,
            liveness,
            coordinator,
            shutdown,
            options,
            start_time: Instant::now(),
        })
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn liveness(&self) -> &ConnectionTracker {
        &self.liveness
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    /// Cancelled when the process starts shutting down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn spawn_reaper(&self) -> tokio::task::JoinHandle<()> {
        spawn_reaper(
            self.ledger.clone(),
            self.options.sweep_interval,
            self.shutdown.clone(),
        )
    }

    /// The plugin said goodbye: nothing pending can be serviced any more.
    pub fn peer_disconnected(&self) -> usize {
        self.liveness.mark_peer_disconnected();
        self.ledger.clear_all()
    }

    /// Interrupt long polls and fail everything still pending.
    pub fn shutdown(&self) -> usize {
        self.shutdown.cancel();
        let cleared = self.ledger.clear_all();
        info!(cleared, "bridge shut down");
        cleared
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn status(&self) -> BridgeStatus {
        BridgeStatus {
            liveness: self.liveness.snapshot(),
            pending_requests: self.ledger.count(),
            uptime_secs: self.uptime().as_secs(),
            ledger: self.ledger.stats(),
        }
    }
}
