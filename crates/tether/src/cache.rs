//! Short-lived cache of plugin results for read-only endpoints.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;

/// TTL cache keyed by endpoint and payload.
///
/// serde_json maps are ordered, so equal payloads always produce equal keys.
#[derive(Debug)]
pub struct ResultCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, Value)>>,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn key(endpoint: &str, payload: &Value) -> String {
        format!("{}\u{0}{}", endpoint, payload)
    }

    /// Fresh cached result, evicting it if it has expired.
    pub fn get(&self, endpoint: &str, payload: &Value) -> Option<Value> {
        let key = Self::key(endpoint, payload);
        let mut entries = self.entries.lock();
        match entries.get(&key) {
            Some((stored, value)) if stored.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, endpoint: &str, payload: &Value, value: Value) {
        self.entries
            .lock()
            .insert(Self::key(endpoint, payload), (Instant::now(), value));
    }

    /// Drop all expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, (stored, _)| stored.elapsed() < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
