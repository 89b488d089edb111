//! Outcomes a caller can observe when its request does not resolve.

use std::time::Duration;

use thiserror::Error;

use crate::ledger::RequestId;

/// Rejection value of a submitted request.
///
/// Callers receive these verbatim from the future returned by
/// [`Ledger::submit`](crate::ledger::Ledger::submit). "Not found" on
/// settlement is deliberately absent: it is reported as a `bool` or a count,
/// never raised.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// The peer did not settle the request within the timeout horizon.
    #[error("request {id} timed out after {after:?}")]
    Timeout { id: RequestId, after: Duration },

    /// The peer disconnected while the request was outstanding.
    #[error("studio plugin disconnected before responding")]
    ConnectionClosed,

    /// The peer executed the request and reported a failure.
    #[error("{0}")]
    Peer(String),

    /// A poll arrived while no dispatcher is listening.
    #[error("dispatcher not connected")]
    DispatcherUnavailable,

    /// The completion handle was dropped without being settled.
    #[error("request dropped before settlement")]
    Dropped,
}

impl BridgeError {
    /// Short machine-readable kind, used in HTTP error bodies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::Timeout { .. } => "timeout",
            BridgeError::ConnectionClosed => "connection_closed",
            BridgeError::Peer(_) => "peer_error",
            BridgeError::DispatcherUnavailable => "dispatcher_unavailable",
            BridgeError::Dropped => "dropped",
        }
    }
}
