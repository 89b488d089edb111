//! End-to-end tests against a real listener on an ephemeral port.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use tether::serve::{build_state, serve_with_listener};
use tether::web::AppState;

struct TestBridge {
    url: String,
    client: reqwest::Client,
    state: AppState,
    shutdown: Option<oneshot::Sender<()>>,
    server: JoinHandle<Result<()>>,
}

impl TestBridge {
    async fn start(config: tetherconf::TetherConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("Failed to bind ephemeral port")?;
        let port = listener.local_addr()?.port();

        let state = build_state(&config);
        let (tx, rx) = oneshot::channel::<()>();
        let server = tokio::spawn(serve_with_listener(listener, state.clone(), async move {
            let _ = rx.await;
        }));

        Ok(Self {
            url: format!("http://127.0.0.1:{}", port),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()?,
            state,
            shutdown: Some(tx),
            server,
        })
    }

    async fn get(&self, path: &str) -> Result<(u16, Value)> {
        let response = self.client.get(format!("{}{}", self.url, path)).send().await?;
        let status = response.status().as_u16();
        Ok((status, response.json().await?))
    }

    async fn post(&self, path: &str, body: Value) -> Result<(u16, Value)> {
        let response = self
            .client
            .post(format!("{}{}", self.url, path))
            .json(&body)
            .send()
            .await?;
        let status = response.status().as_u16();
        Ok((status, response.json().await?))
    }

    async fn stop(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.server.await??;
        Ok(())
    }
}

/// Plugin stand-in: long-poll once and answer everything received.
async fn plugin_round(bridge: &TestBridge, answer: impl Fn(&Value) -> Value) -> Result<usize> {
    let (status, body) = bridge.get("/poll?longPoll=true&maxWait=5000").await?;
    assert_eq!(status, 200);

    let requests = body["requests"].as_array().cloned().unwrap_or_default();
    let responses: Vec<Value> = requests
        .iter()
        .map(|r| json!({"requestId": r["requestId"], "response": answer(&r["request"])}))
        .collect();

    if !responses.is_empty() {
        let (status, body) = bridge.post("/response", json!({"responses": responses})).await?;
        assert_eq!(status, 200);
        assert_eq!(body["notFound"], 0);
    }
    Ok(requests.len())
}

#[tokio::test]
async fn tool_call_round_trips_through_plugin() -> Result<()> {
    let bridge = TestBridge::start(tetherconf::TetherConfig::default()).await?;

    let (status, _) = bridge.post("/ready", json!({})).await?;
    assert_eq!(status, 200);

    let call = bridge.post("/mcp/get_file_tree", json!({"path": "game.Workspace"}));
    let plugin = plugin_round(&bridge, |request| {
        assert_eq!(request["endpoint"], "/api/get-file-tree");
        json!({"echo": request["data"]})
    });
    let (call, answered) = tokio::join!(call, plugin);

    assert_eq!(answered?, 1);
    let (status, body) = call?;
    assert_eq!(status, 200);
    assert_eq!(body["result"], json!({"echo": {"path": "game.Workspace"}}));

    let (_, health) = bridge.get("/health").await?;
    assert_eq!(health["pendingRequests"], 0);
    assert_eq!(health["pluginConnected"], true);

    bridge.stop().await
}

#[tokio::test]
async fn long_poll_wakes_on_submit() -> Result<()> {
    let bridge = TestBridge::start(tetherconf::TetherConfig::default()).await?;

    let started = Instant::now();
    let poll = bridge.get("/poll?longPoll=true&maxWait=5000");
    let submit = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        bridge.state.bridge.ledger().submit("/api/ping", json!({}))
    };
    let (poll, reply) = tokio::join!(poll, submit);

    let (status, body) = poll?;
    assert_eq!(status, 200);
    assert_eq!(body["batchSize"], 1);
    assert_eq!(body["requests"][0]["requestId"], reply.id().to_string());
    assert!(started.elapsed() < Duration::from_secs(4));

    bridge.stop().await
}

#[tokio::test]
async fn poll_refused_when_dispatcher_inactive() -> Result<()> {
    let mut config = tetherconf::TetherConfig::default();
    config.bridge.dispatcher_active_on_start = false;
    let bridge = TestBridge::start(config).await?;

    let (status, body) = bridge.get("/poll").await?;
    assert_eq!(status, 503);
    assert_eq!(body["mcpConnected"], false);
    assert_eq!(body["requests"], json!([]));

    let (status, _) = bridge.post("/mcp/active", json!({"active": true})).await?;
    assert_eq!(status, 200);
    let (status, _) = bridge.get("/poll").await?;
    assert_eq!(status, 200);

    bridge.stop().await
}

#[tokio::test]
async fn timed_out_call_reports_gateway_timeout() -> Result<()> {
    let mut config = tetherconf::TetherConfig::default();
    config.bridge.request_timeout_ms = 200;
    config.bridge.sweep_interval_ms = 50;
    let bridge = TestBridge::start(config).await?;

    let (status, body) = bridge.post("/mcp/get_selection", json!({})).await?;
    assert_eq!(status, 504);
    assert_eq!(body["kind"], "timeout");

    let (_, status_report) = bridge.get("/status").await?;
    assert_eq!(status_report["pendingRequests"], 0);
    assert_eq!(status_report["ledger"]["timedOut"], 1);

    bridge.stop().await
}

#[tokio::test]
async fn shutdown_fails_pending_calls() -> Result<()> {
    let bridge = TestBridge::start(tetherconf::TetherConfig::default()).await?;
    let reply = bridge.state.bridge.ledger().submit("/api/x", json!({}));

    bridge.stop().await?;
    assert_eq!(reply.await, Err(tether::BridgeError::ConnectionClosed));
    Ok(())
}
