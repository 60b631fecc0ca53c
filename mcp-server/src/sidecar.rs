//! Loopback HTTP sidecar.
//!
//! A small companion surface for local tooling that cannot speak MCP:
//! health probe, prompt submission, and status. Binds 127.0.0.1 only;
//! this is not a remote control plane.

use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::routing::post;
use serde_json::Value;
use serde_json::json;
use tracing::info;

use ouro_core::InjectionRequest;
use ouro_core::Orchestrator;

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/prompt", post(prompt))
        .route("/status", get(status))
        .with_state(orchestrator)
}

/// Bind the sidecar and serve it on a background task. Returns the bound
/// address so callers (and tests, via port 0) know where it landed.
pub async fn spawn(orchestrator: Arc<Orchestrator>, port: u16) -> anyhow::Result<SocketAddr> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!("sidecar listening on http://{local_addr}");
    let app = router(orchestrator);
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!("sidecar terminated: {err}");
        }
    });
    Ok(local_addr)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "ouro",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn status(State(orchestrator): State<Arc<Orchestrator>>) -> Json<Value> {
    let report = orchestrator.status().await;
    Json(serde_json::to_value(report).unwrap_or_else(|err| {
        json!({"status": "error", "message": err.to_string()})
    }))
}

async fn prompt(
    State(orchestrator): State<Arc<Orchestrator>>,
    body: String,
) -> (StatusCode, Json<Value>) {
    let request: InjectionRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "status": "error",
                    "error_code": "INVALID_REQUEST",
                    "message": err.to_string(),
                })),
            );
        }
    };
    match orchestrator.submit(request).await {
        Ok(accepted) => (StatusCode::OK, Json(accepted.payload())),
        Err(err) => (StatusCode::OK, Json(err.payload())),
    }
}
