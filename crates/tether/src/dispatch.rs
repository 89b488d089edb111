//! Dispatcher side of the bridge.
//!
//! Tool handlers never talk to the ledger directly: they call
//! [`Dispatcher::call`] with an endpoint and opaque payload and await the
//! plugin's answer. Results for configured read-only endpoints may be served
//! from a short-lived cache.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::bridge::Bridge;
use crate::cache::ResultCache;
use crate::error::BridgeError;

struct CachePolicy {
    cache: ResultCache,
    endpoints: HashSet<String>,
}

pub struct Dispatcher {
    bridge: Arc<Bridge>,
    cache: Option<CachePolicy>,
}

impl Dispatcher {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self {
            bridge,
            cache: None,
        }
    }

    /// Enable result caching for the configured endpoints.
    pub fn with_cache(mut self, config: &tetherconf::CacheConfig) -> Self {
        self.cache = config.enabled().then(|| CachePolicy {
            cache: ResultCache::new(config.ttl()),
            endpoints: config.endpoints.iter().cloned().collect(),
        });
        self
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    fn cache_for(&self, endpoint: &str) -> Option<&ResultCache> {
        self.cache
            .as_ref()
            .filter(|policy| policy.endpoints.contains(endpoint))
            .map(|policy| &policy.cache)
    }

    /// Issue one operation to the plugin and wait for its settlement.
    #[instrument(skip(self, payload))]
    pub async fn call(&self, endpoint: &str, payload: Value) -> Result<Value, BridgeError> {
        self.bridge.liveness().mark_dispatcher_activity();

        let cache = self.cache_for(endpoint);
        if let Some(hit) = cache.and_then(|cache| cache.get(endpoint, &payload)) {
            debug!("served from cache");
            return Ok(hit);
        }

        if !self.bridge.liveness().is_peer_connected() {
            // Still queued: the plugin may reconnect before the timeout.
            debug!("plugin not connected, request will wait for its next poll");
        }

        let reply = self.bridge.ledger().submit(endpoint, payload.clone());
        match reply.await {
            Ok(value) => {
                if let Some(cache) = cache {
                    cache.purge_expired();
                    cache.insert(endpoint, &payload, value.clone());
                }
                Ok(value)
            }
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "call failed");
                Err(e)
            }
        }
    }
}

/// Plugin endpoint for a tool name: `get_file_tree` → `/api/get-file-tree`.
pub fn tool_endpoint(tool: &str) -> String {
    format!("/api/{}", tool.trim_matches('/').replace('_', "-"))
}
