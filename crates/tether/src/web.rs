//! HTTP surface.
//!
//! Plugin-facing endpoints (`/ready`, `/disconnect`, `/poll`, `/response`)
//! plus diagnostics (`/health`, `/status`) and a thin tool-call route for the
//! dispatcher side (`/mcp/{tool}`).

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bridge::Bridge;
use crate::coordinator::PollRequest;
use crate::dispatch::{tool_endpoint, Dispatcher};
use crate::error::BridgeError;
use crate::ledger::{BatchOutcome, Outcome, PendingRequest, RequestId, Settlement};

/// Shared state for web handlers
#[derive(Clone)]
pub struct AppState {
    pub bridge: Arc<Bridge>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(bridge: Arc<Bridge>, dispatcher: Dispatcher) -> Self {
        Self {
            bridge,
            dispatcher: Arc::new(dispatcher),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ready", post(handle_ready))
        .route("/disconnect", post(handle_disconnect))
        .route("/poll", get(handle_poll))
        .route("/response", post(handle_response))
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/mcp/active", post(handle_dispatcher_active))
        .route("/mcp/{tool}", post(handle_tool_call))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = match self {
            BridgeError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            BridgeError::Peer(_) => StatusCode::BAD_GATEWAY,
            BridgeError::ConnectionClosed | BridgeError::DispatcherUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            BridgeError::Dropped => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });
        (status, Json(body)).into_response()
    }
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

async fn handle_ready(State(state): State<AppState>) -> Json<Value> {
    state.bridge.liveness().mark_peer_ready();
    Json(json!({ "success": true }))
}

async fn handle_disconnect(State(state): State<AppState>) -> Json<Value> {
    let cleared = state.bridge.peer_disconnected();
    if cleared > 0 {
        info!(cleared, "plugin disconnected with requests outstanding");
    }
    Json(json!({ "success": true }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollQuery {
    pub long_poll: Option<bool>,
    /// Milliseconds
    pub max_wait: Option<u64>,
    pub max_batch: Option<usize>,
}

impl From<PollQuery> for PollRequest {
    fn from(query: PollQuery) -> Self {
        PollRequest {
            long_poll: query.long_poll.unwrap_or(false),
            max_wait: query.max_wait.map(Duration::from_millis),
            max_batch: query.max_batch,
        }
    }
}

/// One unit of work as the plugin sees it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest {
    request_id: RequestId,
    request: WirePayload,
}

#[derive(Debug, Serialize)]
struct WirePayload {
    endpoint: String,
    data: Value,
}

impl From<PendingRequest> for WireRequest {
    fn from(pending: PendingRequest) -> Self {
        WireRequest {
            request_id: pending.id,
            request: WirePayload {
                endpoint: pending.endpoint,
                data: pending.payload,
            },
        }
    }
}

async fn handle_poll(State(state): State<AppState>, Query(query): Query<PollQuery>) -> Response {
    let request = PollRequest::from(query);
    let liveness = state.bridge.liveness();

    match state.bridge.coordinator().poll(request).await {
        Ok(batch) => {
            let requests: Vec<WireRequest> = batch.into_iter().map(WireRequest::from).collect();
            if !requests.is_empty() {
                debug!(count = requests.len(), "handing work to plugin");
            }
            Json(json!({
                "batchSize": requests.len(),
                "requests": requests,
                "mcpConnected": true,
                "pluginConnected": liveness.is_peer_connected(),
            }))
            .into_response()
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": e.to_string(),
                "pluginConnected": liveness.is_peer_connected(),
                "mcpConnected": false,
                "requests": [],
            })),
        )
            .into_response(),
    }
}

/// Extract the peer's error message, accepting a bare string or an object
/// carrying `message`.
fn peer_error(error: &Value) -> BridgeError {
    let message = match error {
        Value::String(s) => s.clone(),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    };
    BridgeError::Peer(message)
}

/// `{requestId, response}` or `{requestId, error}`. A non-null `error` wins.
fn parse_settlement(obj: &Map<String, Value>) -> Option<(Option<RequestId>, Outcome)> {
    let raw_id = obj.get("requestId")?.as_str()?;
    let outcome = match (obj.get("error"), obj.get("response")) {
        (Some(error), _) if !error.is_null() => Err(peer_error(error)),
        (_, Some(response)) => Ok(response.clone()),
        _ => return None,
    };
    Some((Uuid::parse_str(raw_id).ok(), outcome))
}

async fn handle_response(State(state): State<AppState>, body: Bytes) -> Response {
    let Ok(Value::Object(body)) = serde_json::from_slice::<Value>(&body) else {
        return bad_request("Invalid response format");
    };
    state.bridge.liveness().mark_peer_activity();
    let ledger = state.bridge.ledger();

    if let Some(responses) = body.get("responses").and_then(Value::as_array) {
        let mut settlements = Vec::with_capacity(responses.len());
        let mut malformed = 0;
        for item in responses {
            match item.as_object().and_then(parse_settlement) {
                Some((Some(id), outcome)) => settlements.push(Settlement { id, outcome }),
                _ => malformed += 1,
            }
        }

        let tally = ledger.resolve_batch(settlements);
        let tally = BatchOutcome {
            resolved: tally.resolved,
            not_found: tally.not_found + malformed,
        };
        if tally.not_found > 0 {
            debug!(resolved = tally.resolved, not_found = tally.not_found, "batch partially settled");
        }
        return Json(json!({
            "success": true,
            "resolved": tally.resolved,
            "notFound": tally.not_found,
        }))
        .into_response();
    }

    match parse_settlement(&body) {
        Some((Some(id), outcome)) => {
            if ledger.settle(&id, outcome) {
                Json(json!({ "success": true })).into_response()
            } else {
                request_not_found(&body)
            }
        }
        Some((None, _)) => request_not_found(&body),
        None => bad_request("Invalid response format"),
    }
}

fn request_not_found(body: &Map<String, Value>) -> Response {
    warn!(request_id = ?body.get("requestId"), "response for unknown request");
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Request not found" })),
    )
        .into_response()
}

async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    let liveness = state.bridge.liveness().snapshot();
    Json(json!({
        "status": "ok",
        "service": "tether",
        "version": env!("CARGO_PKG_VERSION"),
        "pluginConnected": liveness.plugin_connected,
        "mcpServerActive": liveness.mcp_connected,
        "pendingRequests": state.bridge.ledger().count(),
        "uptimeSecs": state.bridge.uptime().as_secs(),
    }))
}

async fn handle_status(State(state): State<AppState>) -> Json<Value> {
    let mut status = serde_json::to_value(state.bridge.status()).unwrap_or_else(|_| json!({}));
    if let Value::Object(ref mut obj) = status {
        obj.insert("version".to_string(), json!(env!("CARGO_PKG_VERSION")));
    }
    Json(status)
}

#[derive(Debug, Deserialize)]
struct ActiveBody {
    active: bool,
}

async fn handle_dispatcher_active(
    State(state): State<AppState>,
    Json(body): Json<ActiveBody>,
) -> Json<Value> {
    state.bridge.liveness().set_dispatcher_active(body.active);
    Json(json!({
        "success": true,
        "mcpConnected": state.bridge.liveness().is_dispatcher_active(),
    }))
}

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(tool): Path<String>,
    body: Bytes,
) -> Response {
    let arguments = if body.is_empty() {
        json!({})
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(arguments) => arguments,
            Err(e) => return bad_request(&format!("Invalid tool arguments: {}", e)),
        }
    };

    let endpoint = tool_endpoint(&tool);
    match state.dispatcher.call(&endpoint, arguments).await {
        Ok(result) => Json(json!({ "result": result })).into_response(),
        Err(e) => e.into_response(),
    }
}
