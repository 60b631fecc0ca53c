//! Tool dispatch for the stdio MCP transport.
//!
//! Thin request/response mapping only: every decision about whether and
//! when an injection happens lives in `ouro_core::Orchestrator`. Guardrail
//! and console rejections come back as tool results with `isError` set,
//! not as protocol-level errors.

use std::sync::Arc;

use schemars::JsonSchema;
use schemars::schema_for;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use tracing::trace;

use ouro_core::CommandRequest;
use ouro_core::ConfigureRequest;
use ouro_core::InjectionRequest;
use ouro_core::Orchestrator;

use crate::rpc::INVALID_PARAMS;
use crate::rpc::JsonRpcRequest;
use crate::rpc::JsonRpcResponse;
use crate::rpc::METHOD_NOT_FOUND;

pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Arguments for `ouro_prompt`.
#[derive(Debug, Deserialize, JsonSchema)]
struct PromptArgs {
    /// The text to inject as user input.
    text: String,
    /// Delay in milliseconds before the injection lands; a safety margin
    /// for the agent's current response to finish transmitting.
    delay_ms: Option<u64>,
    /// Optional second injection sent after the first completes, giving
    /// the agent a turn that can see the first one's output.
    follow_up: Option<String>,
    /// Delay in milliseconds between the primary injection and the
    /// follow-up.
    follow_up_delay_ms: Option<u64>,
    /// Why this self-prompt is being issued (audit trail only).
    reason: Option<String>,
}

/// Arguments for `ouro_query`.
#[derive(Debug, Deserialize, JsonSchema)]
struct QueryArgs {
    /// Slash command to inject; must be on the allowlist.
    command: String,
    delay_ms: Option<u64>,
    /// Injection chained after the command completes, so the next agent
    /// turn can read its output.
    follow_up: Option<String>,
    follow_up_delay_ms: Option<u64>,
    reason: Option<String>,
}

/// Arguments for `ouro_configure`.
#[derive(Debug, Default, Deserialize, JsonSchema)]
struct ConfigureArgs {
    turn_limit: Option<u64>,
    cooldown_ms: Option<u64>,
    budget_usd: Option<f64>,
    cost_per_turn: Option<f64>,
    /// One of "local", "remote", "both".
    audit_mode: Option<String>,
    /// Map of command name to "ALLOWED" or "BLOCKED".
    set_command_status: Option<std::collections::HashMap<String, String>>,
}

#[derive(Debug, JsonSchema)]
struct StatusArgs {}

pub struct MessageProcessor {
    orchestrator: Arc<Orchestrator>,
}

impl MessageProcessor {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Handle one incoming message; `None` for notifications.
    pub async fn process(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        trace!(method = %request.method, "incoming request");
        let id = request.id.clone();
        match request.method.as_str() {
            "initialize" => {
                let id = id?;
                let requested_version = request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("protocolVersion"))
                    .and_then(Value::as_str)
                    .unwrap_or(MCP_PROTOCOL_VERSION)
                    .to_string();
                Some(JsonRpcResponse::ok(
                    id,
                    json!({
                        "protocolVersion": requested_version,
                        "serverInfo": {
                            "name": "ouro",
                            "version": env!("CARGO_PKG_VERSION"),
                        },
                        "capabilities": {
                            "tools": { "listChanged": false },
                        },
                    }),
                ))
            }
            "notifications/initialized" | "notifications/cancelled" => None,
            "ping" => Some(JsonRpcResponse::ok(id?, json!({}))),
            "tools/list" => Some(JsonRpcResponse::ok(id?, json!({ "tools": tool_list() }))),
            "tools/call" => {
                let id = id?;
                let params = request.params.unwrap_or(Value::Null);
                let Some(name) = params.get("name").and_then(Value::as_str) else {
                    return Some(JsonRpcResponse::err(
                        id,
                        INVALID_PARAMS,
                        "tools/call requires a tool name",
                    ));
                };
                let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
                let (payload, is_error) = self.call_tool(name, arguments).await;
                Some(JsonRpcResponse::ok(id, tool_result(&payload, is_error)))
            }
            other => Some(JsonRpcResponse::err(
                id?,
                METHOD_NOT_FOUND,
                format!("unknown method: {other}"),
            )),
        }
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> (Value, bool) {
        match name {
            "ouro_prompt" => match serde_json::from_value::<PromptArgs>(arguments) {
                Ok(args) => self.handle_prompt(args).await,
                Err(err) => invalid_args(&err),
            },
            "ouro_status" => {
                let report = serde_json::to_value(self.orchestrator.status().await)
                    .unwrap_or_else(|err| json!({"status": "error", "message": err.to_string()}));
                (report, false)
            }
            "ouro_query" => match serde_json::from_value::<QueryArgs>(arguments) {
                Ok(args) => self.handle_query(args).await,
                Err(err) => invalid_args(&err),
            },
            "ouro_configure" => match serde_json::from_value::<ConfigureArgs>(arguments) {
                Ok(args) => self.handle_configure(args),
                Err(err) => invalid_args(&err),
            },
            other => (
                json!({
                    "status": "error",
                    "error_code": "UNKNOWN_TOOL",
                    "message": format!("unknown tool: {other}"),
                }),
                true,
            ),
        }
    }

    async fn handle_prompt(&self, args: PromptArgs) -> (Value, bool) {
        let mut request = InjectionRequest::new(args.text);
        if let Some(delay_ms) = args.delay_ms {
            request.delay_ms = delay_ms;
        }
        request.follow_up = args.follow_up;
        if let Some(follow_up_delay_ms) = args.follow_up_delay_ms {
            request.follow_up_delay_ms = follow_up_delay_ms;
        }
        request.reason = args.reason.unwrap_or_default();
        match self.orchestrator.submit(request).await {
            Ok(accepted) => (accepted.payload(), false),
            Err(err) => (err.payload(), true),
        }
    }

    async fn handle_query(&self, args: QueryArgs) -> (Value, bool) {
        let request = CommandRequest {
            command: args.command,
            delay_ms: args.delay_ms.unwrap_or(ouro_core::orchestrator::DEFAULT_DELAY_MS),
            follow_up: args.follow_up,
            follow_up_delay_ms: args
                .follow_up_delay_ms
                .unwrap_or(ouro_core::orchestrator::DEFAULT_FOLLOW_UP_DELAY_MS),
            reason: args.reason.unwrap_or_default(),
        };
        match self.orchestrator.submit_command(request).await {
            Ok(accepted) => (accepted.payload(), false),
            Err(err) => (err.payload(), true),
        }
    }

    fn handle_configure(&self, args: ConfigureArgs) -> (Value, bool) {
        let audit_mode = match args.audit_mode.as_deref() {
            None => None,
            Some("local") => Some(ouro_core::AuditMode::Local),
            Some("remote") => Some(ouro_core::AuditMode::Remote),
            Some("both") => Some(ouro_core::AuditMode::Both),
            Some(other) => {
                return (
                    json!({
                        "status": "error",
                        "error_code": "INVALID_ARGUMENTS",
                        "message": format!(
                            "audit_mode must be local, remote, or both (got '{other}')"
                        ),
                    }),
                    true,
                );
            }
        };
        let request = ConfigureRequest {
            turn_limit: args.turn_limit,
            cooldown_ms: args.cooldown_ms,
            budget_usd: args.budget_usd,
            cost_per_turn: args.cost_per_turn,
            audit_mode,
            set_command_status: args.set_command_status.unwrap_or_default(),
        };
        (self.orchestrator.configure(request).payload(), false)
    }
}

fn invalid_args(err: &serde_json::Error) -> (Value, bool) {
    (
        json!({
            "status": "error",
            "error_code": "INVALID_ARGUMENTS",
            "message": err.to_string(),
        }),
        true,
    )
}

fn tool_result(payload: &Value, is_error: bool) -> Value {
    json!({
        "content": [{
            "type": "text",
            "text": payload.to_string(),
        }],
        "isError": is_error,
    })
}

fn tool_list() -> Vec<Value> {
    vec![
        tool(
            "ouro_prompt",
            "Inject text as user input into the hosting agent session. The text \
             appears as if the user typed it, giving the agent a new turn. Use it \
             to sustain an autonomous work loop: decide the next step, inject it, \
             continue on the next turn. Subject to turn, budget, and cooldown \
             guardrails.",
            schema_value::<PromptArgs>(),
        ),
        tool(
            "ouro_status",
            "Report the current session state: turn count and limit, cooldown, \
             budget and estimated cost, console availability, and the last ten \
             injections.",
            schema_value::<StatusArgs>(),
        ),
        tool(
            "ouro_query",
            "Inject an allowlisted slash command, typically with a follow_up so \
             the next agent turn can read the command output. Blocked or unknown \
             commands are rejected before any guardrail runs.",
            schema_value::<QueryArgs>(),
        ),
        tool(
            "ouro_configure",
            "Adjust session limits (turn_limit, cooldown_ms, budget_usd, \
             cost_per_turn), the audit mode, or per-command allow/block status \
             at runtime.",
            schema_value::<ConfigureArgs>(),
        ),
    ]
}

fn tool(name: &str, description: &str, input_schema: Value) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": input_schema,
    })
}

fn schema_value<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| json!({"type": "object"}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ouro_core::AuditSink;
    use ouro_core::FakeConsole;
    use ouro_core::Injector;
    use ouro_core::OuroConfig;
    use pretty_assertions::assert_eq;

    fn processor_with_fake() -> (FakeConsole, MessageProcessor, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tmp");
        let mut config = OuroConfig::default();
        config.cooldown_ms = 0;
        config.audit.path = dir.path().join("audit.jsonl");
        let fake = FakeConsole::new();
        let injector = Arc::new(Injector::new(fake.driver()));
        let audit = Arc::new(AuditSink::new(&config.audit));
        let orchestrator = Arc::new(Orchestrator::new(&config, injector, audit));
        (fake, MessageProcessor::new(orchestrator), dir)
    }

    fn request(method: &str, id: Option<i64>, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: id.map(|n| json!(n)),
            method: method.to_string(),
            params: Some(params),
        }
    }

    fn parse_tool_text(response: &JsonRpcResponse) -> Value {
        let result = response.result.as_ref().expect("result");
        let text = result["content"][0]["text"].as_str().expect("text");
        serde_json::from_str(text).expect("payload json")
    }

    #[tokio::test]
    async fn initialize_reports_tools_capability() {
        let (_fake, processor, _dir) = processor_with_fake();
        let response = processor
            .process(request(
                "initialize",
                Some(1),
                json!({"protocolVersion": "2025-03-26"}),
            ))
            .await
            .expect("response");
        let result = response.result.expect("result");
        assert_eq!(result["protocolVersion"], json!("2025-03-26"));
        assert_eq!(result["serverInfo"]["name"], json!("ouro"));
    }

    #[tokio::test]
    async fn tools_list_exposes_all_four_tools() {
        let (_fake, processor, _dir) = processor_with_fake();
        let response = processor
            .process(request("tools/list", Some(2), json!({})))
            .await
            .expect("response");
        let tools = response.result.expect("result")["tools"]
            .as_array()
            .expect("array")
            .clone();
        let names: Vec<&str> = tools
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        assert_eq!(
            names,
            vec!["ouro_prompt", "ouro_status", "ouro_query", "ouro_configure"]
        );
        assert_eq!(tools[0]["inputSchema"]["type"], json!("object"));
    }

    #[tokio::test(start_paused = true)]
    async fn prompt_tool_returns_injected_ack() {
        let (fake, processor, _dir) = processor_with_fake();
        let response = processor
            .process(request(
                "tools/call",
                Some(3),
                json!({"name": "ouro_prompt", "arguments": {"text": "next step", "delay_ms": 5}}),
            ))
            .await
            .expect("response");
        let payload = parse_tool_text(&response);
        assert_eq!(payload["status"], json!("injected"));
        assert_eq!(payload["turn_count"], json!(1));
        assert_eq!(
            response.result.expect("result")["isError"],
            json!(false)
        );

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(fake.written(), vec!["next step\r".to_string()]);
    }

    #[tokio::test]
    async fn prompt_tool_surfaces_console_unavailable() {
        let (fake, processor, _dir) = processor_with_fake();
        fake.fail_at(ouro_core::console::FakeFailure::Attach);
        let response = processor
            .process(request(
                "tools/call",
                Some(4),
                json!({"name": "ouro_prompt", "arguments": {"text": "x"}}),
            ))
            .await
            .expect("response");
        assert_eq!(response.result.as_ref().expect("result")["isError"], json!(true));
        let payload = parse_tool_text(&response);
        assert_eq!(payload["error_code"], json!("CONSOLE_NOT_AVAILABLE"));
    }

    #[tokio::test]
    async fn query_tool_rejects_blocked_command() {
        let (_fake, processor, _dir) = processor_with_fake();
        let response = processor
            .process(request(
                "tools/call",
                Some(5),
                json!({"name": "ouro_query", "arguments": {"command": "/clear"}}),
            ))
            .await
            .expect("response");
        let payload = parse_tool_text(&response);
        assert_eq!(payload["error_code"], json!("COMMAND_BLOCKED"));
        assert_eq!(payload["block_reason"], json!("destructive"));
    }

    #[tokio::test]
    async fn status_tool_reports_console_and_counters() {
        let (_fake, processor, _dir) = processor_with_fake();
        let response = processor
            .process(request(
                "tools/call",
                Some(6),
                json!({"name": "ouro_status", "arguments": {}}),
            ))
            .await
            .expect("response");
        let payload = parse_tool_text(&response);
        assert_eq!(payload["turn_count"], json!(0));
        assert_eq!(payload["console_available"], json!(true));
        assert_eq!(payload["active"], json!(false));
    }

    #[tokio::test]
    async fn configure_tool_applies_changes() {
        let (_fake, processor, _dir) = processor_with_fake();
        let response = processor
            .process(request(
                "tools/call",
                Some(7),
                json!({"name": "ouro_configure", "arguments": {"turn_limit": 42}}),
            ))
            .await
            .expect("response");
        let payload = parse_tool_text(&response);
        assert_eq!(payload["status"], json!("configured"));
        assert_eq!(payload["changes"]["turn_limit"], json!(42));
        assert_eq!(payload["current_config"]["turn_limit"], json!(42));
    }

    #[tokio::test]
    async fn unknown_method_is_a_protocol_error() {
        let (_fake, processor, _dir) = processor_with_fake();
        let response = processor
            .process(request("bogus/method", Some(8), json!({})))
            .await
            .expect("response");
        let error = response.error.expect("error");
        assert_eq!(error.code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let (_fake, processor, _dir) = processor_with_fake();
        let response = processor
            .process(request("notifications/initialized", None, json!({})))
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn unknown_tool_is_a_tool_error() {
        let (_fake, processor, _dir) = processor_with_fake();
        let response = processor
            .process(request(
                "tools/call",
                Some(9),
                json!({"name": "velociraptor", "arguments": {}}),
            ))
            .await
            .expect("response");
        assert_eq!(response.result.as_ref().expect("result")["isError"], json!(true));
        let payload = parse_tool_text(&response);
        assert_eq!(payload["error_code"], json!("UNKNOWN_TOOL"));
    }
}
