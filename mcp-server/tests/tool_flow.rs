//! End-to-end tool flow over the processor: initialize, then drive the
//! injection tools the way a client session would.

use std::sync::Arc;

use ouro_core::AuditSink;
use ouro_core::FakeConsole;
use ouro_core::Injector;
use ouro_core::Orchestrator;
use ouro_core::OuroConfig;
use ouro_mcp_server::JsonRpcRequest;
use ouro_mcp_server::JsonRpcResponse;
use ouro_mcp_server::MessageProcessor;
use pretty_assertions::assert_eq;
use serde_json::Value;
use serde_json::json;

struct Session {
    fake: FakeConsole,
    processor: MessageProcessor,
    _audit_dir: tempfile::TempDir,
    next_id: i64,
}

impl Session {
    fn new(turn_limit: u64) -> Self {
        let dir = tempfile::tempdir().expect("tmp");
        let mut config = OuroConfig::default();
        config.turn_limit = turn_limit;
        config.cooldown_ms = 0;
        config.audit.path = dir.path().join("audit.jsonl");
        let fake = FakeConsole::new();
        let injector = Arc::new(Injector::new(fake.driver()));
        let audit = Arc::new(AuditSink::new(&config.audit));
        let orchestrator = Arc::new(Orchestrator::new(&config, injector, audit));
        Self {
            fake,
            processor: MessageProcessor::new(orchestrator),
            _audit_dir: dir,
            next_id: 1,
        }
    }

    async fn send(&mut self, method: &str, params: Value) -> JsonRpcResponse {
        let line = json!({
            "jsonrpc": "2.0",
            "id": self.next_id,
            "method": method,
            "params": params,
        });
        self.next_id += 1;
        let request: JsonRpcRequest =
            serde_json::from_value(line).expect("request parses");
        self.processor.process(request).await.expect("response")
    }

    async fn call(&mut self, tool: &str, arguments: Value) -> Value {
        let response = self
            .send("tools/call", json!({"name": tool, "arguments": arguments}))
            .await;
        let result = response.result.expect("result");
        let text = result["content"][0]["text"].as_str().expect("text");
        serde_json::from_str(text).expect("payload json")
    }
}

#[tokio::test(start_paused = true)]
async fn full_session_drives_turns_until_the_limit() {
    let mut session = Session::new(2);

    let init = session
        .send("initialize", json!({"protocolVersion": "2024-11-05"}))
        .await;
    assert_eq!(
        init.result.expect("result")["serverInfo"]["name"],
        json!("ouro")
    );

    let first = session
        .call("ouro_prompt", json!({"text": "step one", "delay_ms": 5}))
        .await;
    assert_eq!(first["status"], json!("injected"));
    assert_eq!(first["turn_count"], json!(1));

    let second = session
        .call(
            "ouro_prompt",
            json!({
                "text": "step two",
                "delay_ms": 20,
                "follow_up": "report results",
                "follow_up_delay_ms": 10,
            }),
        )
        .await;
    assert_eq!(second["turn_count"], json!(2));
    assert_eq!(second["has_follow_up"], json!(true));

    let third = session
        .call("ouro_prompt", json!({"text": "step three"}))
        .await;
    assert_eq!(third["status"], json!("error"));
    assert_eq!(third["error_code"], json!("TURN_LIMIT_REACHED"));

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(
        session.fake.written(),
        vec![
            "step one\r".to_string(),
            "step two\r".to_string(),
            "report results\r".to_string(),
        ]
    );

    let status = session.call("ouro_status", json!({})).await;
    assert_eq!(status["turn_count"], json!(2));
    assert_eq!(status["turn_limit"], json!(2));
    assert_eq!(status["recent_injections"].as_array().map(Vec::len), Some(2));
}

#[tokio::test(start_paused = true)]
async fn query_tool_injects_allowed_command_with_follow_up() {
    let mut session = Session::new(10);

    let accepted = session
        .call(
            "ouro_query",
            json!({
                "command": "/status",
                "delay_ms": 5,
                "follow_up": "summarize the status output",
                "follow_up_delay_ms": 10,
            }),
        )
        .await;
    assert_eq!(accepted["status"], json!("injected"));

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(
        session.fake.written(),
        vec![
            "/status\r".to_string(),
            "summarize the status output\r".to_string(),
        ]
    );
}

#[tokio::test]
async fn configure_tightens_limits_mid_session() {
    let mut session = Session::new(10);

    let configured = session
        .call(
            "ouro_configure",
            json!({
                "turn_limit": 1,
                "set_command_status": {"/clear": "ALLOWED"},
            }),
        )
        .await;
    assert_eq!(configured["changes"]["turn_limit"], json!(1));
    assert_eq!(
        configured["changes"]["command_status"]["/clear"],
        json!("ALLOWED")
    );

    let unblocked = session
        .call("ouro_query", json!({"command": "/clear", "delay_ms": 1}))
        .await;
    assert_eq!(unblocked["status"], json!("injected"));

    let over_limit = session
        .call("ouro_prompt", json!({"text": "one more"}))
        .await;
    assert_eq!(over_limit["error_code"], json!("TURN_LIMIT_REACHED"));
}
