//! tether - request correlation bridge between a tool dispatcher and a studio
//! plugin that can only make outbound HTTP requests.
//!
//! The dispatcher submits work and awaits a reply; the plugin long-polls for
//! that work and posts results back. This library provides:
//! - `ledger`: pending requests, FIFO order, exactly-once settlement, timers
//! - `coordinator`: short and long polls with batch limits
//! - `liveness`: plugin and dispatcher connection state
//! - `reaper`: periodic sweep for expired requests
//! - `bridge`: the above wired together
//! - `dispatch`: dispatcher-side facade with optional result caching
//! - `web`: HTTP routes
//! - `serve`: server bootstrap and graceful shutdown

pub mod bridge;
pub mod cache;
pub mod commands;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod liveness;
pub mod reaper;
pub mod serve;
pub mod telemetry;
pub mod web;

pub use bridge::{Bridge, BridgeOptions, BridgeStatus};
pub use dispatch::Dispatcher;
pub use error::BridgeError;
pub use ledger::{Ledger, PendingRequest, RequestId, Settlement};
