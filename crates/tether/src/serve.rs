//! HTTP server: composition root for the bridge.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::bridge::{Bridge, BridgeOptions};
use crate::dispatch::Dispatcher;
use crate::telemetry;
use crate::web::{router, AppState};

/// Build the shared state from configuration.
pub fn build_state(config: &tetherconf::TetherConfig) -> AppState {
    let bridge = Bridge::new(BridgeOptions::from(config));
    if config.bridge.dispatcher_active_on_start {
        bridge.liveness().set_dispatcher_active(true);
    }
    let dispatcher = Dispatcher::new(Arc::clone(&bridge)).with_cache(&config.cache);
    AppState::new(bridge, dispatcher)
}

/// Run the bridge on the configured address until SIGINT/SIGTERM.
pub async fn run(config: tetherconf::TetherConfig) -> Result<()> {
    let addr = config.infra.bind.addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("tether bridge starting");
    info!("   Request timeout: {:?}", config.bridge.request_timeout());
    info!("   Poll: GET http://{}/poll", addr);
    info!("   Health: GET http://{}/health", addr);

    serve_with_listener(listener, build_state(&config), shutdown_signal()).await
}

/// Serve on an already-bound listener until `shutdown` resolves.
///
/// On shutdown, long polls are interrupted and every pending request fails
/// with `ConnectionClosed` before in-flight connections drain.
pub async fn serve_with_listener<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let bridge = Arc::clone(&state.bridge);
    telemetry::register_ledger_metrics(&telemetry::meter(), bridge.ledger());
    let reaper = bridge.spawn_reaper();

    let signal_bridge = Arc::clone(&bridge);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            signal_bridge.shutdown();
        })
        .await
        .context("Server error")?;

    if !bridge.shutdown_token().is_cancelled() {
        bridge.shutdown();
    }
    if let Err(e) = reaper.await {
        warn!("Reaper task ended abnormally: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
