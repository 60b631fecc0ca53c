//! Top-level injection coordination.
//!
//! `submit` gates a request through the command registry (for command-style
//! requests), the guardrail pipeline, and a console availability pre-check,
//! then mutates session state and schedules the two-phase background
//! sequence. The caller gets an acknowledgement immediately; background
//! failures are logged and audited, never surfaced to the original caller,
//! which has already returned.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tracing::debug;
use tracing::warn;

use crate::audit::AuditEntry;
use crate::audit::AuditMode;
use crate::audit::AuditSink;
use crate::config::OuroConfig;
use crate::console::ConsoleProbe;
use crate::guardrails;
use crate::guardrails::GuardrailBreach;
use crate::injector::Injector;
use crate::registry;
use crate::registry::CommandRegistry;
use crate::registry::CommandStatus;
use crate::state::InjectionRecord;
use crate::state::SessionState;

pub const DEFAULT_DELAY_MS: u64 = 500;
pub const DEFAULT_FOLLOW_UP_DELAY_MS: u64 = 3000;

/// One injection request. Owned by the call that creates it; the background
/// task consumes it and drops it.
#[derive(Debug, Clone, Deserialize)]
pub struct InjectionRequest {
    pub text: String,
    /// Safety margin for the agent's current response to finish before the
    /// primary injection lands.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Optional second injection, chained after the primary completes so
    /// the agent gets a turn to observe its effect.
    #[serde(default)]
    pub follow_up: Option<String>,
    /// Measured from completion of the primary write, not request time.
    #[serde(default = "default_follow_up_delay_ms")]
    pub follow_up_delay_ms: u64,
    /// Audit-trail annotation only; never interpreted.
    #[serde(default)]
    pub reason: String,
}

impl InjectionRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            delay_ms: DEFAULT_DELAY_MS,
            follow_up: None,
            follow_up_delay_ms: DEFAULT_FOLLOW_UP_DELAY_MS,
            reason: String::new(),
        }
    }
}

fn default_delay_ms() -> u64 {
    DEFAULT_DELAY_MS
}

fn default_follow_up_delay_ms() -> u64 {
    DEFAULT_FOLLOW_UP_DELAY_MS
}

/// Registry-gated variant of [`InjectionRequest`].
#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default)]
    pub follow_up: Option<String>,
    #[serde(default = "default_follow_up_delay_ms")]
    pub follow_up_delay_ms: u64,
    #[serde(default)]
    pub reason: String,
}

/// Synchronous acknowledgement for an accepted request. The injection
/// itself has not happened yet when this is returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Accepted {
    pub turn_count: u64,
    pub turn_limit: u64,
    pub delay_ms: u64,
    pub has_follow_up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_up_delay_ms: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl Accepted {
    pub fn payload(&self) -> Value {
        let mut value = json!({ "status": "injected" });
        if let (Value::Object(map), Ok(Value::Object(fields))) =
            (&mut value, serde_json::to_value(self))
        {
            map.extend(fields);
        }
        value
    }
}

/// Rejections surfaced synchronously to the caller. All recoverable; the
/// next request re-runs every gate from scratch.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SubmitError {
    #[error(transparent)]
    Guardrail(#[from] GuardrailBreach),
    #[error("no console available for injection: {detail}")]
    ConsoleUnavailable { detail: String },
    #[error("command '{name}' is blocked ({block_reason})")]
    CommandBlocked { name: String, block_reason: String },
    #[error("unknown command '{name}'")]
    CommandUnknown { name: String },
}

impl SubmitError {
    pub fn code(&self) -> &'static str {
        match self {
            SubmitError::Guardrail(breach) => breach.code(),
            SubmitError::ConsoleUnavailable { .. } => "CONSOLE_NOT_AVAILABLE",
            SubmitError::CommandBlocked { .. } => "COMMAND_BLOCKED",
            SubmitError::CommandUnknown { .. } => "COMMAND_UNKNOWN",
        }
    }

    /// Structured wire payload with per-variant detail fields.
    pub fn payload(&self) -> Value {
        let mut value = json!({
            "status": "error",
            "error_code": self.code(),
            "message": self.to_string(),
            "timestamp": Utc::now(),
        });
        let Value::Object(map) = &mut value else {
            return value;
        };
        match self {
            SubmitError::Guardrail(GuardrailBreach::TurnLimitReached {
                turn_count,
                turn_limit,
            }) => {
                map.insert("turn_count".to_string(), json!(turn_count));
                map.insert("turn_limit".to_string(), json!(turn_limit));
            }
            SubmitError::Guardrail(GuardrailBreach::BudgetExceeded {
                estimated_cost_usd,
                budget_usd,
                turn_count,
            }) => {
                map.insert("estimated_cost_usd".to_string(), json!(estimated_cost_usd));
                map.insert("budget_usd".to_string(), json!(budget_usd));
                map.insert("turn_count".to_string(), json!(turn_count));
            }
            SubmitError::Guardrail(GuardrailBreach::CooldownActive { cooldown_ms }) => {
                map.insert("cooldown_ms".to_string(), json!(cooldown_ms));
            }
            SubmitError::ConsoleUnavailable { .. } => {}
            SubmitError::CommandBlocked { name, block_reason } => {
                map.insert("command".to_string(), json!(name));
                map.insert("block_reason".to_string(), json!(block_reason));
            }
            SubmitError::CommandUnknown { name } => {
                map.insert("command".to_string(), json!(name));
            }
        }
        value
    }
}

/// Snapshot returned by `ouro_status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub active: bool,
    pub turn_count: u64,
    pub turn_limit: u64,
    pub cooldown_ms: u64,
    pub budget_usd: f64,
    pub cost_per_turn: f64,
    pub estimated_cost_usd: f64,
    pub audit_mode: AuditMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_start: Option<DateTime<Utc>>,
    pub console_available: bool,
    pub console: ConsoleProbe,
    pub recent_injections: Vec<InjectionRecord>,
    pub timestamp: DateTime<Utc>,
}

/// Runtime configuration changes applied by `ouro_configure`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigureRequest {
    pub turn_limit: Option<u64>,
    pub cooldown_ms: Option<u64>,
    pub budget_usd: Option<f64>,
    pub cost_per_turn: Option<f64>,
    pub audit_mode: Option<AuditMode>,
    #[serde(default)]
    pub set_command_status: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Configured {
    pub changes: Value,
    pub current_config: Value,
}

impl Configured {
    pub fn payload(&self) -> Value {
        json!({
            "status": "configured",
            "changes": self.changes,
            "current_config": self.current_config,
        })
    }
}

pub struct Orchestrator {
    state: Mutex<SessionState>,
    registry: Mutex<CommandRegistry>,
    injector: Arc<Injector>,
    audit: Arc<AuditSink>,
}

impl Orchestrator {
    pub fn new(config: &OuroConfig, injector: Arc<Injector>, audit: Arc<AuditSink>) -> Self {
        Self {
            state: Mutex::new(SessionState::from_config(config)),
            registry: Mutex::new(CommandRegistry::new()),
            injector,
            audit,
        }
    }

    /// Gate, record, and schedule one free-text injection.
    pub async fn submit(&self, request: InjectionRequest) -> Result<Accepted, SubmitError> {
        self.submit_as("ouro_prompt", request).await
    }

    /// Registry-gated command injection. Blocked and unknown commands are
    /// rejected before any guardrail runs or state changes.
    pub async fn submit_command(&self, request: CommandRequest) -> Result<Accepted, SubmitError> {
        let name = registry::normalize(&request.command);
        let gate = {
            let registry = lock(&self.registry);
            match registry.lookup(&name) {
                None => Some(SubmitError::CommandUnknown { name: name.clone() }),
                Some(spec) if spec.status == CommandStatus::Blocked => {
                    Some(SubmitError::CommandBlocked {
                        name: name.clone(),
                        block_reason: spec.block_reason.unwrap_or("blocked").to_string(),
                    })
                }
                Some(_) => None,
            }
        };
        if let Some(err) = gate {
            self.audit_rejection("ouro_query", &name, &request.reason, &err);
            return Err(err);
        }
        self.submit_as(
            "ouro_query",
            InjectionRequest {
                text: name,
                delay_ms: request.delay_ms,
                follow_up: request.follow_up,
                follow_up_delay_ms: request.follow_up_delay_ms,
                reason: request.reason,
            },
        )
        .await
    }

    async fn submit_as(
        &self,
        tool: &'static str,
        request: InjectionRequest,
    ) -> Result<Accepted, SubmitError> {
        // Guardrails surface first: a turn-limit or budget breach is the
        // session-level answer, and a request they reject must not churn
        // the process-global console association at all.
        let now = Utc::now();
        let breach = {
            let state = lock(&self.state);
            guardrails::evaluate(&state, now).err()
        };
        if let Some(breach) = breach {
            let err = SubmitError::Guardrail(breach);
            self.audit_rejection(tool, &request.text, &request.reason, &err);
            return Err(err);
        }

        // Availability pre-check before scheduling. Each injection
        // reattaches, so this is advisory, but it rejects without
        // consuming a turn.
        let probe = self.injector.probe().await;
        if !probe.available {
            let err = SubmitError::ConsoleUnavailable {
                detail: probe.error.unwrap_or_else(|| "unknown".to_string()),
            };
            self.audit_rejection(tool, &request.text, &request.reason, &err);
            return Err(err);
        }

        // Re-check and increment as one critical section so two requests
        // that both passed above cannot take the same final slot.
        let accepted = {
            let mut state = lock(&self.state);
            if let Err(breach) = guardrails::evaluate(&state, now) {
                drop(state);
                let err = SubmitError::Guardrail(breach);
                self.audit_rejection(tool, &request.text, &request.reason, &err);
                return Err(err);
            }
            let turn_count = state.record_accepted(&request.text, &request.reason, now);
            self.audit.record(
                AuditEntry::new(tool, &request.text, &request.reason, "injected")
                    .with_turn(turn_count)
                    .with_session_start(state.session_start),
            );
            Accepted {
                turn_count,
                turn_limit: state.turn_limit,
                delay_ms: request.delay_ms,
                has_follow_up: request.follow_up.is_some(),
                follow_up_delay_ms: request.follow_up.as_ref().map(|_| request.follow_up_delay_ms),
                timestamp: now,
            }
        };

        self.schedule(tool, request, accepted.turn_count);
        Ok(accepted)
    }

    /// Detached two-phase background sequence. Runs to completion or
    /// natural failure; a failed primary suppresses the follow-up, a failed
    /// follow-up does not retroactively fail the already-acknowledged
    /// primary.
    fn schedule(&self, tool: &'static str, request: InjectionRequest, turn: u64) {
        let injector = Arc::clone(&self.injector);
        let audit = Arc::clone(&self.audit);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(request.delay_ms)).await;
            match injector.inject(&request.text, true).await {
                Ok(written) => {
                    debug!(turn, written, "primary injection complete");
                }
                Err(err) => {
                    warn!(turn, %err, "primary injection failed");
                    audit.record(
                        AuditEntry::new(tool, &request.text, &request.reason, "primary_failed")
                            .with_turn(turn),
                    );
                    return;
                }
            }
            let Some(follow_up) = request.follow_up else {
                return;
            };
            tokio::time::sleep(Duration::from_millis(request.follow_up_delay_ms)).await;
            match injector.inject(&follow_up, true).await {
                Ok(written) => {
                    debug!(turn, written, "follow-up injection complete");
                }
                Err(err) => {
                    warn!(turn, %err, "follow-up injection failed");
                    audit.record(
                        AuditEntry::new(tool, &follow_up, &request.reason, "follow_up_failed")
                            .with_turn(turn),
                    );
                }
            }
        });
    }

    pub async fn status(&self) -> StatusReport {
        let console = self.injector.probe().await;
        let state = lock(&self.state);
        StatusReport {
            active: state.session_start.is_some(),
            turn_count: state.turn_count,
            turn_limit: state.turn_limit,
            cooldown_ms: state.cooldown_ms,
            budget_usd: state.budget_usd,
            cost_per_turn: state.cost_per_turn,
            estimated_cost_usd: state.estimated_cost(),
            audit_mode: self.audit.mode(),
            session_start: state.session_start,
            console_available: console.available,
            console,
            recent_injections: state.recent_injections(),
            timestamp: Utc::now(),
        }
    }

    /// Apply runtime limit changes; invalid values are reported in
    /// `changes` and skipped rather than failing the whole call.
    pub fn configure(&self, request: ConfigureRequest) -> Configured {
        let mut changes = serde_json::Map::new();
        {
            let mut state = lock(&self.state);
            if let Some(turn_limit) = request.turn_limit {
                if turn_limit == 0 {
                    changes.insert("turn_limit".to_string(), json!("invalid: must be > 0"));
                } else {
                    state.turn_limit = turn_limit;
                    changes.insert("turn_limit".to_string(), json!(turn_limit));
                }
            }
            if let Some(cooldown_ms) = request.cooldown_ms {
                state.cooldown_ms = cooldown_ms;
                changes.insert("cooldown_ms".to_string(), json!(cooldown_ms));
            }
            if let Some(budget_usd) = request.budget_usd {
                state.budget_usd = budget_usd;
                changes.insert("budget_usd".to_string(), json!(budget_usd));
            }
            if let Some(cost_per_turn) = request.cost_per_turn {
                state.cost_per_turn = cost_per_turn;
                changes.insert("cost_per_turn".to_string(), json!(cost_per_turn));
            }
        }
        if let Some(mode) = request.audit_mode {
            self.audit.set_mode(mode);
            changes.insert("audit_mode".to_string(), json!(mode));
        }
        if !request.set_command_status.is_empty() {
            let mut registry = lock(&self.registry);
            let mut command_changes = serde_json::Map::new();
            for (name, status) in &request.set_command_status {
                let parsed = match status.as_str() {
                    "ALLOWED" => Some(CommandStatus::Allowed),
                    "BLOCKED" => Some(CommandStatus::Blocked),
                    _ => None,
                };
                let outcome = match parsed {
                    None => "invalid_status".to_string(),
                    Some(parsed) if registry.set_status(name, parsed) => status.clone(),
                    Some(_) => "not_found".to_string(),
                };
                command_changes.insert(registry::normalize(name), json!(outcome));
            }
            changes.insert("command_status".to_string(), Value::Object(command_changes));
        }

        let state = lock(&self.state);
        let current_config = json!({
            "turn_count": state.turn_count,
            "turn_limit": state.turn_limit,
            "cooldown_ms": state.cooldown_ms,
            "budget_usd": state.budget_usd,
            "cost_per_turn": state.cost_per_turn,
            "audit_mode": self.audit.mode(),
        });
        Configured {
            changes: Value::Object(changes),
            current_config,
        }
    }

    fn audit_rejection(&self, tool: &str, text: &str, reason: &str, err: &SubmitError) {
        let session_start = lock(&self.state).session_start;
        self.audit.record(
            AuditEntry::new(tool, text, reason, &err.code().to_ascii_lowercase())
                .with_session_start(session_start),
        );
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
