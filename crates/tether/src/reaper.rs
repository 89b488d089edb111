//! Periodic sweep backing up the per-request timers.
//!
//! Each request already carries its own timer; the sweep guarantees a terminal
//! state even if a timer task was starved or lost.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::ledger::Ledger;

/// Shortest sweep period; `tokio::time::interval` panics on zero.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Spawn the sweep loop. Runs until `shutdown` is cancelled.
pub fn spawn_reaper(
    ledger: Ledger,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let interval = interval.max(MIN_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("Reaper started (interval: {:?})", interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let expired = ledger.sweep_expired();
                    if expired > 0 {
                        debug!(expired, remaining = ledger.count(), "reaper swept expired requests");
                    }
                }
                _ = shutdown.cancelled() => {
                    debug!("Reaper shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn reaper_stops_on_shutdown() {
        let ledger = Ledger::new(Duration::from_secs(30));
        let shutdown = CancellationToken::new();
        let handle = spawn_reaper(ledger, Duration::from_secs(1), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(3)).await;
        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_survives_zero_interval() {
        let ledger = Ledger::new(Duration::from_secs(30));
        let shutdown = CancellationToken::new();
        let handle = spawn_reaper(ledger, Duration::ZERO, shutdown.clone());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_expires_old_requests() {
        let ledger = Ledger::new(Duration::from_secs(2));
        let shutdown = CancellationToken::new();
        let _handle = spawn_reaper(ledger.clone(), Duration::from_millis(500), shutdown.clone());

        let reply = ledger.submit("/api/x", json!({}));
        let id = reply.id();
        // Only the sweep can settle it now.
        assert!(ledger.abort_timer(&id));
        assert!(matches!(reply.await, Err(BridgeError::Timeout { .. })));
        assert!(!ledger.contains(&id));
        assert_eq!(ledger.stats().timed_out, 1);

        shutdown.cancel();
    }
}
