//! Allow/block registry for slash-command injections.
//!
//! Commands the front end executes rather than forwards to the agent get an
//! explicit allow/block decision before guardrails run. Blocked entries
//! carry the reason they are unsafe to inject (interactive UIs, destructive
//! operations, session handoffs). Unknown commands are rejected outright.

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Allowed,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSpec {
    pub status: CommandStatus,
    pub description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<&'static str>,
}

const fn allowed(description: &'static str) -> CommandSpec {
    CommandSpec {
        status: CommandStatus::Allowed,
        description,
        block_reason: None,
    }
}

const fn blocked(description: &'static str, reason: &'static str) -> CommandSpec {
    CommandSpec {
        status: CommandStatus::Blocked,
        description,
        block_reason: Some(reason),
    }
}

const BUILTIN: &[(&str, CommandSpec)] = &[
    // Session management
    ("/clear", blocked("Clear conversation history and start fresh", "destructive")),
    ("/compact", allowed("Compact conversation to free context")),
    ("/exit", blocked("Exit the front-end REPL", "session_terminating")),
    ("/resume", blocked("Resume a previous conversation", "interactive")),
    ("/rename", blocked("Give the current session a name", "session_altering")),
    ("/rewind", blocked("Rewind conversation and/or code changes", "destructive")),
    ("/plan", blocked("Enter plan mode", "mode_change")),
    ("/teleport", blocked("Resume a remote session locally", "session_handoff")),
    ("/desktop", blocked("Hand off session to the desktop app", "session_handoff")),
    ("/fork", blocked("Branch conversation into a new session", "session_altering")),
    // Information and diagnostics
    ("/help", blocked("Show all available commands", "interactive")),
    ("/cost", blocked("Show token usage statistics", "does_not_exist")),
    ("/context", allowed("Visualize context window usage")),
    ("/status", allowed("Show version, model, account, connectivity")),
    ("/stats", allowed("Visualize daily usage, session history")),
    ("/usage", allowed("Show plan usage limits and rate limits")),
    ("/doctor", allowed("Check installation health")),
    ("/debug", allowed("Read session debug log")),
    ("/release-notes", allowed("View release notes")),
    // Configuration and settings
    ("/config", blocked("Open interactive settings interface", "config_modification")),
    ("/model", blocked("Change AI model", "config_modification")),
    ("/permissions", blocked("View or update tool permissions", "security_sensitive")),
    ("/theme", blocked("Change color theme", "config_modification")),
    ("/output-style", blocked("Configure response formatting", "config_modification")),
    ("/vim", blocked("Toggle vim editing mode", "config_modification")),
    ("/terminal-setup", blocked("Install keyboard shortcuts", "config_modification")),
    ("/statusline", blocked("Set up status line UI", "config_modification")),
    ("/sandbox", blocked("Enable sandboxed command execution", "security_sensitive")),
    ("/fast", blocked("Toggle fast mode", "config_modification")),
    ("/privacy-settings", blocked("View and update privacy settings", "security_sensitive")),
    // Project and memory
    ("/init", blocked("Initialize project memory file", "project_modification")),
    ("/memory", blocked("Open project memory editor", "interactive")),
    ("/add-dir", blocked("Add working directories", "scope_change")),
    ("/todos", allowed("Show current TODO items")),
    // Development workflow
    ("/review", blocked("Request code review of recent changes", "triggers_analysis")),
    ("/pr-comments", blocked("View pull request comments", "context_dependent")),
    ("/install-github-app", blocked("Set up CI integration", "external_integration")),
    // Tools and integrations
    ("/mcp", blocked("Manage MCP server connections", "interactive")),
    ("/ide", allowed("View IDE integrations and status")),
    ("/agents", blocked("Manage custom subagents", "interactive")),
    ("/hooks", blocked("Configure hooks", "config_modification")),
    ("/plugin", blocked("Plugin management interface", "interactive")),
    // Account management
    ("/login", blocked("Log in or switch accounts", "authentication")),
    ("/logout", blocked("Sign out", "authentication")),
    ("/upgrade", blocked("Upgrade subscription", "financial")),
    ("/passes", blocked("Manage guest passes", "account_management")),
    // Export and output
    ("/export", blocked("Export conversation to file or clipboard", "file_write")),
    ("/copy", blocked("Copy last response to clipboard", "low_risk_but_unnecessary")),
    // Background tasks
    ("/tasks", allowed("List and manage background tasks")),
    ("/bashes", allowed("List and manage background shells")),
    // Reporting
    ("/bug", blocked("Report a bug upstream", "external_communication")),
    // Remote sessions
    ("/remote-env", blocked("Configure remote environment", "config_modification")),
    // Migration
    ("/migrate-installer", blocked("Migrate to a local install", "system_modification")),
];

/// In-memory command table with runtime status overrides.
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    entries: HashMap<&'static str, CommandSpec>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self {
            entries: BUILTIN.iter().map(|(name, spec)| (*name, spec.clone())).collect(),
        }
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a command, tolerating a missing leading slash.
    pub fn lookup(&self, name: &str) -> Option<&CommandSpec> {
        let normalized = normalize(name);
        self.entries.get(normalized.as_str())
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        self.lookup(name)
            .is_some_and(|spec| spec.status == CommandStatus::Allowed)
    }

    /// Override a command's status in memory. Returns `false` when the
    /// command is not in the registry.
    pub fn set_status(&mut self, name: &str, status: CommandStatus) -> bool {
        let normalized = normalize(name);
        match self.entries.get_mut(normalized.as_str()) {
            Some(spec) => {
                spec.status = status;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn normalize(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    }
}
