//! Connection liveness for both ends of the bridge.
//!
//! Two independent records, each a flag plus a last-activity timestamp:
//! - **peer** (the studio plugin): connected while flagged ready AND seen
//!   within the staleness window. Every poll and response refreshes it.
//! - **dispatcher** (the tool-calling side in this process): the explicit
//!   active flag alone. The flag is sticky; activity timestamps are recorded
//!   for diagnostics but never expire it, so an idle dispatcher does not flap
//!   to disconnected between tool calls.
//!
//! Liveness is computed at read time. Nothing here runs in the background.

use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
struct Side {
    flag: bool,
    last_activity: Option<Instant>,
}

impl Side {
    fn secs_ago(&self) -> Option<u64> {
        self.last_activity.map(|t| t.elapsed().as_secs())
    }
}

/// Snapshot for health and poll responses.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LivenessSnapshot {
    pub plugin_connected: bool,
    pub mcp_connected: bool,
    pub last_plugin_activity_secs_ago: Option<u64>,
    pub last_mcp_activity_secs_ago: Option<u64>,
}

/// Tracks peer and dispatcher liveness. One per bridge; shared by reference.
#[derive(Debug)]
pub struct ConnectionTracker {
    peer: RwLock<Side>,
    dispatcher: RwLock<Side>,
    peer_window: Duration,
}

impl ConnectionTracker {
    pub fn new(peer_window: Duration) -> Self {
        Self {
            peer: RwLock::new(Side::default()),
            dispatcher: RwLock::new(Side::default()),
            peer_window,
        }
    }

    pub fn peer_window(&self) -> Duration {
        self.peer_window
    }

    /// The plugin announced itself via `/ready`.
    pub fn mark_peer_ready(&self) {
        let was = self.is_peer_connected();
        *self.peer.write() = Side {
            flag: true,
            last_activity: Some(Instant::now()),
        };
        if !was {
            info!("studio plugin connected");
        }
    }

    /// The plugin polled or posted a response.
    pub fn mark_peer_activity(&self) {
        let mut peer = self.peer.write();
        peer.flag = true;
        peer.last_activity = Some(Instant::now());
    }

    /// The plugin announced it is going away via `/disconnect`.
    pub fn mark_peer_disconnected(&self) {
        self.peer.write().flag = false;
        info!("studio plugin disconnected");
    }

    pub fn is_peer_connected(&self) -> bool {
        let peer = *self.peer.read();
        peer.flag
            && peer
                .last_activity
                .is_some_and(|t| t.elapsed() < self.peer_window)
    }

    /// Set by the process that owns the dispatcher.
    pub fn set_dispatcher_active(&self, active: bool) {
        let prev = {
            let mut dispatcher = self.dispatcher.write();
            let prev = dispatcher.flag;
            dispatcher.flag = active;
            dispatcher.last_activity = Some(Instant::now());
            prev
        };
        if prev != active {
            info!(active, "dispatcher liveness changed");
        }
    }

    /// A tool call passed through the dispatcher.
    pub fn mark_dispatcher_activity(&self) {
        self.dispatcher.write().last_activity = Some(Instant::now());
    }

    pub fn is_dispatcher_active(&self) -> bool {
        self.dispatcher.read().flag
    }

    pub fn snapshot(&self) -> LivenessSnapshot {
        let peer = *self.peer.read();
        let dispatcher = *self.dispatcher.read();
        LivenessSnapshot {
            plugin_connected: self.is_peer_connected(),
            mcp_connected: dispatcher.flag,
            last_plugin_activity_secs_ago: peer.secs_ago(),
            last_mcp_activity_secs_ago: dispatcher.secs_ago(),
        }
    }
}
