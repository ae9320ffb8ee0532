//! prism server shell.
//!
//! Binds the gateway router behind the cross-cutting HTTP layers: CORS,
//! request-id propagation, and the health endpoint. Reusable by the binary
//! and by integration tests.

#![deny(missing_docs)]

mod logger;
mod request_id;

use std::sync::Arc;

use anyhow::anyhow;
use axum::{Json, Router, extract::State, routing::get};
use config::Config;
use gateway::{Gateway, ToolRegistry};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

pub use logger::init as init_logger;

/// Everything `serve` needs to run.
pub struct ServeConfig {
    /// The process configuration snapshot.
    pub config: Config,

    /// Local tool handlers; empty for a pure proxy deployment.
    pub registry: Arc<ToolRegistry>,

    /// Cancellation token for graceful shutdown.
    pub shutdown_signal: CancellationToken,

    /// Version string logged on startup.
    pub version: String,

    /// Optional oneshot to report the bound address (port 0 support).
    pub bound_addr_sender: Option<tokio::sync::oneshot::Sender<std::net::SocketAddr>>,
}

/// Start the HTTP server and run until shutdown.
pub async fn serve(
    ServeConfig {
        config,
        registry,
        shutdown_signal,
        version,
        bound_addr_sender,
    }: ServeConfig,
) -> anyhow::Result<()> {
    logger::init(&config.log_filter);

    log::info!("prism {version}");
    log::info!(
        "backend: {} at {}",
        config.backend,
        config.upstream.api_base
    );

    if !registry.names().is_empty() {
        log::info!("local tools registered: {}", registry.names().join(", "));
    }

    let listen_address = config.listen_address;
    let gateway = Arc::new(Gateway::new(&config, registry));

    let health_router = Router::new().route("/health", get(health)).with_state(gateway.clone());

    let app = gateway::router(gateway)
        .merge(health_router)
        .layer(axum::middleware::from_fn(request_id::propagate))
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|error| anyhow!("failed to bind to {listen_address}: {error}"))?;

    if let Some(sender) = bound_addr_sender {
        let local_addr = listener.local_addr()?;
        if sender.send(local_addr).is_err() {
            log::debug!("bound address receiver dropped");
        }
    }

    log::info!("Messages endpoint: http://{listen_address}/v1/messages");

    tokio::select! {
        result = axum::serve(listener, app.into_make_service()) => {
            result.map_err(|error| anyhow!("server failed: {error}"))?;
        }
        _ = shutdown_signal.cancelled() => {
            log::info!("received shutdown signal, shutting down gracefully...");
        }
    }

    Ok(())
}

/// Liveness plus a counter snapshot.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    backend: config::BackendKind,
    metrics: gateway::MetricsSnapshot,
}

async fn health(State(gateway): State<Arc<Gateway>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        backend: gateway.backend(),
        metrics: gateway.metrics_snapshot(),
    })
}
