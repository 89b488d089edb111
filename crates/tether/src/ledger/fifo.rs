//! Insertion-ordered index of request ids.
//!
//! Settlement removes entries from the ledger map in arbitrary order. Rather
//! than splicing the id out of the queue on every settlement, the index keeps
//! the stale id and drops it lazily: at the head during retrieval, within the
//! scanned prefix after a batch peek, or in one full pass once stale ids
//! outnumber live ones.

use std::collections::VecDeque;

use super::RequestId;

/// Below this length a full compaction is never worth triggering.
const COMPACT_MIN_LEN: usize = 64;

#[derive(Debug, Default)]
pub(crate) struct FifoIndex {
    ids: VecDeque<RequestId>,
    /// Upper bound on stale ids currently held.
    stale: usize,
}

impl FifoIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_back(&mut self, id: RequestId) {
        self.ids.push_back(id);
    }

    pub(crate) fn front(&self) -> Option<&RequestId> {
        self.ids.front()
    }

    /// Discard the head, which the caller found to be stale.
    pub(crate) fn pop_stale_front(&mut self) {
        if self.ids.pop_front().is_some() {
            self.stale = self.stale.saturating_sub(1);
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &RequestId> {
        self.ids.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }

    /// Record that `id` is no longer live.
    ///
    /// A settled head is popped right away; anything deeper is left for lazy
    /// compaction. Returns true when stale ids dominate and the caller should
    /// run [`FifoIndex::compact`].
    pub(crate) fn forget(&mut self, id: &RequestId) -> bool {
        if self.ids.front() == Some(id) {
            self.ids.pop_front();
            return false;
        }
        self.stale += 1;
        self.ids.len() >= COMPACT_MIN_LEN && self.stale * 2 > self.ids.len()
    }

    /// Drop stale ids among the first `scanned` entries in a single pass.
    pub(crate) fn compact_prefix(&mut self, scanned: usize, is_live: impl Fn(&RequestId) -> bool) {
        let scanned = scanned.min(self.ids.len());
        let kept: Vec<RequestId> = self.ids.drain(..scanned).filter(|id| is_live(id)).collect();
        self.stale = self.stale.saturating_sub(scanned - kept.len());
        for id in kept.into_iter().rev() {
            self.ids.push_front(id);
        }
    }

    /// Drop every stale id in one pass.
    pub(crate) fn compact(&mut self, is_live: impl Fn(&RequestId) -> bool) {
        self.ids.retain(|id| is_live(id));
        self.stale = 0;
    }

    pub(crate) fn clear(&mut self) {
        self.ids.clear();
        self.stale = 0;
    }
}
