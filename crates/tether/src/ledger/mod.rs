//! Pending request ledger.
//!
//! Every request the dispatcher hands to the studio plugin lives here from
//! `submit` until exactly one settlement: resolved by the plugin, rejected by
//! the plugin, timed out, or cleared on disconnect. Callers hold a [`Reply`]
//! future; the plugin drives settlement through a separate call path keyed by
//! [`RequestId`].
//!
//! Architecture:
//! - map of id → entry (request snapshot, oneshot sender, timer handle)
//! - [`FifoIndex`] of ids in enqueue order, lazily compacted
//! - one tokio timer task per entry, aborted on settlement
//!
//! All methods take a single mutex and never hold it across an await.

mod fifo;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{futures::Notified, oneshot, Notify};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::BridgeError;
use fifo::FifoIndex;

/// Correlation token linking a submitted request to its settlement.
pub type RequestId = Uuid;

/// Terminal value delivered to the caller.
pub type Outcome = Result<Value, BridgeError>;

/// Snapshot of a live request, as handed to the plugin.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub id: RequestId,
    pub endpoint: String,
    pub payload: Value,
    pub enqueued_at: Instant,
}

impl PendingRequest {
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

/// One settlement in a batch posted by the plugin.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub id: RequestId,
    pub outcome: Outcome,
}

impl Settlement {
    pub fn resolve(id: RequestId, value: Value) -> Self {
        Self { id, outcome: Ok(value) }
    }

    pub fn reject(id: RequestId, error: BridgeError) -> Self {
        Self {
            id,
            outcome: Err(error),
        }
    }
}

/// Tally of a batch settlement. Unknown ids are counted, never raised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub resolved: usize,
    pub not_found: usize,
}

/// Diagnostic snapshot for `/status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStats {
    pub pending: usize,
    pub index_len: usize,
    pub oldest_age_ms: Option<u64>,
    pub timeout_ms: u64,
    pub submitted: u64,
    pub resolved: u64,
    pub rejected: u64,
    pub timed_out: u64,
    pub cleared: u64,
}

struct Entry {
    request: PendingRequest,
    settle: oneshot::Sender<Outcome>,
    timer: AbortHandle,
}

#[derive(Default)]
struct Counters {
    submitted: u64,
    resolved: u64,
    rejected: u64,
    timed_out: u64,
    cleared: u64,
}

struct LedgerState {
    entries: HashMap<RequestId, Entry>,
    fifo: FifoIndex,
    counters: Counters,
}

impl LedgerState {
    /// Remove a live entry from both the map and the index.
    fn remove(&mut self, id: &RequestId) -> Option<Entry> {
        let entry = self.entries.remove(id)?;
        if self.fifo.forget(id) {
            let entries = &self.entries;
            self.fifo.compact(|id| entries.contains_key(id));
        }
        Some(entry)
    }
}

impl Drop for LedgerState {
    fn drop(&mut self) {
        for entry in self.entries.values() {
            entry.timer.abort();
        }
    }
}

struct Inner {
    state: Mutex<LedgerState>,
    timeout: Duration,
    work: Notify,
}

/// The in-flight request ledger. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Ledger {
    inner: Arc<Inner>,
}

impl Ledger {
    /// Create an empty ledger whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(LedgerState {
                    entries: HashMap::new(),
                    fifo: FifoIndex::new(),
                    counters: Counters::default(),
                }),
                timeout,
                work: Notify::new(),
            }),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Register a request and return its reply future immediately.
    ///
    /// Must be called from within a tokio runtime: the timeout is a spawned
    /// timer task holding only a weak reference to the ledger.
    pub fn submit(&self, endpoint: impl Into<String>, payload: Value) -> Reply {
        let id = Uuid::new_v4();
        let (settle, rx) = oneshot::channel();
        let request = PendingRequest {
            id,
            endpoint: endpoint.into(),
            payload,
            enqueued_at: Instant::now(),
        };

        {
            let mut state = self.inner.state.lock();
            // Spawned under the lock so the timer can never observe the map
            // before the entry is in it.
            let timer = spawn_timer(Arc::downgrade(&self.inner), id, self.inner.timeout);
            trace!(%id, endpoint = %request.endpoint, "request submitted");
            state.fifo.push_back(id);
            state.entries.insert(
                id,
                Entry {
                    request,
                    settle,
                    timer,
                },
            );
            state.counters.submitted += 1;
        }

        self.inner.work.notify_waiters();
        Reply { id, rx }
    }

    /// Oldest live request, without removing it.
    pub fn peek_oldest(&self) -> Option<PendingRequest> {
        let mut state = self.inner.state.lock();
        loop {
            let id = *state.fifo.front()?;
            if let Some(entry) = state.entries.get(&id) {
                return Some(entry.request.clone());
            }
            state.fifo.pop_stale_front();
        }
    }

    /// Up to `max_count` live requests, oldest first. Read only: entries stay
    /// pending until settled. Stale ids met during the scan are dropped.
    pub fn peek_batch(&self, max_count: usize) -> Vec<PendingRequest> {
        let mut state = self.inner.state.lock();
        let mut batch = Vec::with_capacity(max_count.min(state.entries.len()));
        let mut scanned = 0;
        let mut stale_seen = 0;

        for id in state.fifo.iter() {
            if batch.len() >= max_count {
                break;
            }
            scanned += 1;
            match state.entries.get(id) {
                Some(entry) => batch.push(entry.request.clone()),
                None => stale_seen += 1,
            }
        }

        if stale_seen > 0 {
            let LedgerState { entries, fifo, .. } = &mut *state;
            fifo.compact_prefix(scanned, |id| entries.contains_key(id));
            trace!(stale_seen, "compacted fifo prefix");
        }

        batch
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.inner.state.lock().entries.contains_key(id)
    }

    pub fn count(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    /// Resolve `id` with `value`. Returns false if it is not pending.
    pub fn resolve(&self, id: &RequestId, value: Value) -> bool {
        self.settle(id, Ok(value))
    }

    /// Reject `id` with `error`. Returns false if it is not pending.
    pub fn reject(&self, id: &RequestId, error: BridgeError) -> bool {
        self.settle(id, Err(error))
    }

    /// Apply one settlement. Exactly-once: a second call for the same id
    /// returns false and leaves the first outcome untouched.
    pub fn settle(&self, id: &RequestId, outcome: Outcome) -> bool {
        let mut state = self.inner.state.lock();
        let Some(entry) = state.remove(id) else {
            return false;
        };
        entry.timer.abort();

        match &outcome {
            Ok(_) => state.counters.resolved += 1,
            Err(BridgeError::Timeout { .. }) => state.counters.timed_out += 1,
            Err(_) => state.counters.rejected += 1,
        }
        debug!(
            %id,
            endpoint = %entry.request.endpoint,
            ok = outcome.is_ok(),
            elapsed_ms = entry.request.age().as_millis() as u64,
            "request settled"
        );

        // The caller may have stopped waiting; that is not our concern.
        let _ = entry.settle.send(outcome);
        true
    }

    /// Apply settlements in order, tallying unknown ids instead of failing.
    pub fn resolve_batch(&self, settlements: impl IntoIterator<Item = Settlement>) -> BatchOutcome {
        let mut tally = BatchOutcome::default();
        for Settlement { id, outcome } in settlements {
            if self.settle(&id, outcome) {
                tally.resolved += 1;
            } else {
                tally.not_found += 1;
            }
        }
        tally
    }

    /// Reject `id` with a timeout. No-op when already settled.
    pub fn expire(&self, id: &RequestId) -> bool {
        let expired = self.settle(
            id,
            Err(BridgeError::Timeout {
                id: *id,
                after: self.inner.timeout,
            }),
        );
        if expired {
            debug!(%id, "request timed out");
        }
        expired
    }

    /// Time out every request older than the timeout horizon. Backs up the
    /// per-request timers; whichever fires first wins.
    pub fn sweep_expired(&self) -> usize {
        let timeout = self.inner.timeout;
        let expired: Vec<RequestId> = {
            let state = self.inner.state.lock();
            state
                .entries
                .values()
                .filter(|entry| entry.request.age() > timeout)
                .map(|entry| entry.request.id)
                .collect()
        };

        expired.iter().filter(|id| self.expire(id)).count()
    }

    /// Cancel the per-request timer of `id`, leaving only the sweep to expire it.
    #[cfg(test)]
    pub(crate) fn abort_timer(&self, id: &RequestId) -> bool {
        match self.inner.state.lock().entries.get(id) {
            Some(entry) => {
                entry.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Reject everything with `ConnectionClosed` and empty the ledger.
    pub fn clear_all(&self) -> usize {
        let mut state = self.inner.state.lock();
        let drained: Vec<Entry> = state.entries.drain().map(|(_, entry)| entry).collect();
        state.fifo.clear();
        state.counters.cleared += drained.len() as u64;

        let count = drained.len();
        for entry in drained {
            entry.timer.abort();
            let _ = entry.settle.send(Err(BridgeError::ConnectionClosed));
        }
        if count > 0 {
            debug!(count, "cleared pending requests");
        }
        count
    }

    /// Resolves on the next `submit`. Register before checking for work to
    /// avoid missing a wake-up.
    pub fn work_available(&self) -> Notified<'_> {
        self.inner.work.notified()
    }

    pub fn stats(&self) -> LedgerStats {
        let state = self.inner.state.lock();
        let oldest_age_ms = state
            .fifo
            .iter()
            .find_map(|id| state.entries.get(id))
            .map(|entry| entry.request.age().as_millis() as u64);

        LedgerStats {
            pending: state.entries.len(),
            index_len: state.fifo.len(),
            oldest_age_ms,
            timeout_ms: self.inner.timeout.as_millis() as u64,
            submitted: state.counters.submitted,
            resolved: state.counters.resolved,
            rejected: state.counters.rejected,
            timed_out: state.counters.timed_out,
            cleared: state.counters.cleared,
        }
    }
}

fn spawn_timer(inner: Weak<Inner>, id: RequestId, after: Duration) -> AbortHandle {
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        if let Some(inner) = inner.upgrade() {
            Ledger { inner }.expire(&id);
        }
    })
    .abort_handle()
}

/// Future returned by [`Ledger::submit`], resolving with the request's
/// settlement.
#[derive(Debug)]
pub struct Reply {
    id: RequestId,
    rx: oneshot::Receiver<Outcome>,
}

impl Reply {
    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl Future for Reply {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(BridgeError::Dropped)))
    }
}
