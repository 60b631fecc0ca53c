//! MCP server exposing the console-injection tools over stdio.
//!
//! One JSON-RPC message per line on stdin, one response per line on
//! stdout. Logging goes to stderr; stdout carries only the transport.

use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tracing::debug;
use tracing::info;
use tracing::warn;

use ouro_core::AuditSink;
use ouro_core::Injector;
use ouro_core::Orchestrator;
use ouro_core::OuroConfig;
use ouro_core::native_driver;

mod message_processor;
mod rpc;
pub mod sidecar;

pub use message_processor::MessageProcessor;
pub use rpc::JsonRpcRequest;
pub use rpc::JsonRpcResponse;

pub async fn run_main() -> anyhow::Result<()> {
    let config = OuroConfig::load_default();
    let injector = Arc::new(Injector::new(native_driver()));
    let audit = Arc::new(AuditSink::new(&config.audit));
    let orchestrator = Arc::new(Orchestrator::new(&config, injector, audit));

    if config.sidecar.enabled {
        sidecar::spawn(orchestrator.clone(), config.sidecar.port)
            .await
            .context("failed to start sidecar")?;
    }

    info!(
        turn_limit = config.turn_limit,
        cooldown_ms = config.cooldown_ms,
        "ouro mcp server starting"
    );
    serve_stdio(MessageProcessor::new(orchestrator)).await
}

async fn serve_stdio(processor: MessageProcessor) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<JsonRpcRequest>(trimmed) {
            Ok(request) => processor.process(request).await,
            Err(err) => {
                warn!("malformed request line: {err}");
                Some(JsonRpcResponse::err(
                    Value::Null,
                    rpc::PARSE_ERROR,
                    err.to_string(),
                ))
            }
        };
        let Some(response) = response else {
            continue;
        };
        let mut payload = serde_json::to_string(&response)?;
        payload.push('\n');
        stdout.write_all(payload.as_bytes()).await?;
        stdout.flush().await?;
    }

    debug!("stdin closed, shutting down");
    Ok(())
}
