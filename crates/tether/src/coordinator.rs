//! Long-poll coordinator.
//!
//! The plugin cannot be pushed to, so it asks for work: "give me up to N
//! requests, waiting up to M ms". A short poll peeks once; a long poll keeps
//! re-checking until work shows up, the wait runs out, or the process begins
//! shutting down.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::error::BridgeError;
use crate::ledger::{Ledger, PendingRequest};
use crate::liveness::ConnectionTracker;

/// Bounds applied to every poll regardless of what the plugin asks for.
#[derive(Debug, Clone)]
pub struct PollLimits {
    /// Re-check period while waiting.
    pub interval: Duration,
    /// Ceiling on the requested wait.
    pub max_wait: Duration,
    /// Ceiling on the requested batch size.
    pub max_batch: usize,
    /// Batch size when the plugin does not specify one.
    pub default_batch: usize,
}

/// Shortest re-check period for a waiting long poll.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

impl PollLimits {
    /// Raise zero bounds to the smallest usable values.
    fn normalized(self) -> Self {
        Self {
            interval: self.interval.max(MIN_INTERVAL),
            max_batch: self.max_batch.max(1),
            default_batch: self.default_batch.max(1),
            ..self
        }
    }
}

impl Default for PollLimits {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(50),
            max_wait: Duration::from_secs(30),
            max_batch: 50,
            default_batch: 5,
        }
    }
}

impl From<&tetherconf::PollConfig> for PollLimits {
    fn from(config: &tetherconf::PollConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_ms),
            max_wait: Duration::from_millis(config.max_wait_ms),
            max_batch: config.max_batch,
            default_batch: config.default_batch,
        }
        .normalized()
    }
}

/// One poll as requested by the plugin, before clamping.
#[derive(Debug, Clone, Copy, Default)]
pub struct PollRequest {
    pub long_poll: bool,
    pub max_wait: Option<Duration>,
    pub max_batch: Option<usize>,
}

pub struct Coordinator {
    ledger: Ledger,
    liveness: Arc<ConnectionTracker>,
    limits: PollLimits,
    shutdown: CancellationToken,
}

impl Coordinator {
    pub fn new(
        ledger: Ledger,
        liveness: Arc<ConnectionTracker>,
        limits: PollLimits,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            ledger,
            liveness,
            limits: limits.normalized(),
            shutdown,
        }
    }

    pub fn limits(&self) -> &PollLimits {
        &self.limits
    }

    /// Batch size actually used for `request`.
    pub fn batch_size(&self, request: &PollRequest) -> usize {
        request
            .max_batch
            .unwrap_or(self.limits.default_batch)
            .clamp(1, self.limits.max_batch)
    }

    /// Hand the plugin its next batch of work, oldest first.
    ///
    /// Always counts as plugin activity. Fails with
    /// [`BridgeError::DispatcherUnavailable`] before looking at the ledger if
    /// nothing is listening for results.
    #[instrument(skip(self), fields(long_poll = request.long_poll))]
    pub async fn poll(&self, request: PollRequest) -> Result<Vec<PendingRequest>, BridgeError> {
        self.liveness.mark_peer_activity();

        if !self.liveness.is_dispatcher_active() {
            return Err(BridgeError::DispatcherUnavailable);
        }

        let batch_size = self.batch_size(&request);
        if !request.long_poll {
            return Ok(self.ledger.peek_batch(batch_size));
        }

        let wait = request
            .max_wait
            .unwrap_or(self.limits.max_wait)
            .min(self.limits.max_wait);
        let deadline = Instant::now() + wait;

        loop {
            let woken = self.ledger.work_available();
            let batch = self.ledger.peek_batch(batch_size);
            let now = Instant::now();
            if !batch.is_empty() || now >= deadline {
                debug!(count = batch.len(), "long poll returning");
                return Ok(batch);
            }

            let next_check = (now + self.limits.interval).min(deadline);
            tokio::select! {
                _ = woken => {}
                _ = tokio::time::sleep_until(next_check) => {}
                _ = self.shutdown.cancelled() => {
                    debug!("long poll interrupted by shutdown");
                    return Ok(batch);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn coordinator(ledger: &Ledger) -> (Coordinator, Arc<ConnectionTracker>, CancellationToken) {
        let liveness = Arc::new(ConnectionTracker::new(Duration::from_secs(10)));
        liveness.set_dispatcher_active(true);
        let shutdown = CancellationToken::new();
        let coordinator = Coordinator::new(
            ledger.clone(),
            Arc::clone(&liveness),
            PollLimits::default(),
            shutdown.clone(),
        );
        (coordinator, liveness, shutdown)
    }

    fn long(wait_ms: u64) -> PollRequest {
        PollRequest {
            long_poll: true,
            max_wait: Some(Duration::from_millis(wait_ms)),
            max_batch: None,
        }
    }

    #[tokio::test]
    async fn refuses_when_dispatcher_inactive() {
        let ledger = Ledger::new(Duration::from_secs(30));
        let _reply = ledger.submit("/api/x", json!({}));
        let (coordinator, liveness, _) = coordinator(&ledger);
        liveness.set_dispatcher_active(false);

        let result = coordinator.poll(PollRequest::default()).await;
        assert_eq!(result, Err(BridgeError::DispatcherUnavailable));
        // The poll still counts as the plugin being alive.
        assert!(liveness.is_peer_connected());
    }

    #[tokio::test]
    async fn short_poll_returns_immediately() {
        let ledger = Ledger::new(Duration::from_secs(30));
        let (coordinator, _, _) = coordinator(&ledger);

        let empty = coordinator.poll(PollRequest::default()).await.unwrap();
        assert!(empty.is_empty());

        let reply = ledger.submit("/api/x", json!({"n": 1}));
        let batch = coordinator.poll(PollRequest::default()).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, reply.id());
    }

    #[tokio::test]
    async fn batch_size_is_clamped() {
        let ledger = Ledger::new(Duration::from_secs(30));
        let (coordinator, _, _) = coordinator(&ledger);

        let ask = |n| PollRequest {
            max_batch: Some(n),
            ..PollRequest::default()
        };
        assert_eq!(coordinator.batch_size(&PollRequest::default()), 5);
        assert_eq!(coordinator.batch_size(&ask(0)), 1);
        assert_eq!(coordinator.batch_size(&ask(500)), 50);

        let _replies: Vec<_> = (0..8).map(|n| ledger.submit("/api/x", json!(n))).collect();
        let batch = coordinator.poll(ask(3)).await.unwrap();
        assert_eq!(batch.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_raised() {
        let ledger = Ledger::new(Duration::from_secs(30));
        let liveness = Arc::new(ConnectionTracker::new(Duration::from_secs(10)));
        liveness.set_dispatcher_active(true);
        let limits = PollLimits::from(&tetherconf::PollConfig {
            interval_ms: 0,
            max_wait_ms: 200,
            max_batch: 0,
            default_batch: 0,
        });
        assert_eq!(limits.interval, Duration::from_millis(1));
        assert_eq!(limits.max_batch, 1);

        let coordinator = Coordinator::new(
            ledger,
            liveness,
            PollLimits {
                interval: Duration::ZERO,
                ..limits
            },
            CancellationToken::new(),
        );
        assert_eq!(coordinator.limits().interval, Duration::from_millis(1));

        let started = Instant::now();
        let batch = coordinator.poll(long(200)).await.unwrap();
        assert!(batch.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn long_poll_times_out_empty() {
        let ledger = Ledger::new(Duration::from_secs(30));
        let (coordinator, _, _) = coordinator(&ledger);

        let started = Instant::now();
        let batch = coordinator.poll(long(500)).await.unwrap();
        assert!(batch.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn long_poll_wait_is_capped() {
        let ledger = Ledger::new(Duration::from_secs(300));
        let (coordinator, _, _) = coordinator(&ledger);

        let started = Instant::now();
        coordinator.poll(long(120_000)).await.unwrap();
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(30));
        assert!(waited < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn long_poll_returns_when_work_arrives() {
        let ledger = Ledger::new(Duration::from_secs(30));
        let (coordinator, _, _) = coordinator(&ledger);

        let submitter = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                ledger.submit("/api/late", json!({}))
            })
        };

        let started = Instant::now();
        let batch = coordinator.poll(long(10_000)).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].endpoint, "/api/late");
        assert!(started.elapsed() < Duration::from_secs(1));

        let reply = submitter.await.unwrap();
        assert_eq!(batch[0].id, reply.id());
    }

    #[tokio::test(start_paused = true)]
    async fn long_poll_interrupted_by_shutdown() {
        let ledger = Ledger::new(Duration::from_secs(30));
        let (coordinator, _, shutdown) = coordinator(&ledger);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            shutdown.cancel();
        });

        let started = Instant::now();
        let batch = coordinator.poll(long(20_000)).await.unwrap();
        assert!(batch.is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
