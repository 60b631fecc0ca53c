//! Fire-and-forget audit trail.
//!
//! Every accepted or rejected request, and every background-phase failure,
//! produces one structured entry. Delivery is best-effort: a failed append
//! or POST is logged and dropped, never propagated to the injection path.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::config::AuditConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditMode {
    /// Append JSONL to the local audit file.
    Local,
    /// POST entries to the configured HTTP endpoint.
    Remote,
    /// Both of the above.
    Both,
}

impl AuditMode {
    fn local(self) -> bool {
        matches!(self, AuditMode::Local | AuditMode::Both)
    }

    fn remote(self) -> bool {
        matches!(self, AuditMode::Remote | AuditMode::Both)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn: Option<u64>,
    pub text: String,
    pub reason: String,
    pub outcome: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_start: Option<DateTime<Utc>>,
}

impl AuditEntry {
    pub fn new(tool: &str, text: &str, reason: &str, outcome: &str) -> Self {
        Self {
            tool: tool.to_string(),
            turn: None,
            text: text.to_string(),
            reason: reason.to_string(),
            outcome: outcome.to_string(),
            timestamp: Utc::now(),
            session_start: None,
        }
    }

    pub fn with_turn(mut self, turn: u64) -> Self {
        self.turn = Some(turn);
        self
    }

    pub fn with_session_start(mut self, session_start: Option<DateTime<Utc>>) -> Self {
        self.session_start = session_start;
        self
    }
}

const REMOTE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct AuditSink {
    mode: Mutex<AuditMode>,
    path: PathBuf,
    endpoint: Option<String>,
    client: reqwest::Client,
}

impl AuditSink {
    pub fn new(config: &AuditConfig) -> Self {
        Self {
            mode: Mutex::new(config.mode),
            path: config.path.clone(),
            endpoint: config.endpoint.clone(),
            client: reqwest::Client::new(),
        }
    }

    pub fn mode(&self) -> AuditMode {
        *lock(&self.mode)
    }

    pub fn set_mode(&self, mode: AuditMode) {
        *lock(&self.mode) = mode;
    }

    /// Record one entry. Never blocks the caller on network I/O and never
    /// returns an error.
    pub fn record(&self, entry: AuditEntry) {
        let mode = self.mode();
        if mode.local() {
            self.append_local(&entry);
        }
        if mode.remote() {
            self.forward_remote(&entry, mode);
        }
    }

    fn append_local(&self, entry: &AuditEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(line) => line,
            Err(err) => {
                warn!(%err, "audit entry did not serialize");
                return;
            }
        };
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(err) = result {
            warn!(path = %self.path.display(), %err, "failed to write audit log");
        }
    }

    fn forward_remote(&self, entry: &AuditEntry, mode: AuditMode) {
        let Some(endpoint) = self.endpoint.clone() else {
            warn!("remote audit mode set but no endpoint configured");
            return;
        };
        let observation = match serde_json::to_string(entry) {
            Ok(observation) => observation,
            Err(err) => {
                warn!(%err, "audit entry did not serialize");
                return;
            }
        };
        let payload = json!({
            "observation": observation,
            "confidence": 0.9,
            "domain": "ouro_audit",
            "evidence": [format!("ouro_turn_{}", entry.turn.map_or_else(|| "?".to_string(), |t| t.to_string()))],
        });
        let client = self.client.clone();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("remote audit skipped: no async runtime");
            return;
        };
        handle.spawn(async move {
            let response = client
                .post(&endpoint)
                .timeout(REMOTE_TIMEOUT)
                .json(&payload)
                .send()
                .await;
            match response {
                Ok(response) if !response.status().is_success() => {
                    warn!(status = %response.status(), "remote audit endpoint rejected entry");
                }
                Ok(_) => {}
                Err(err) if mode == AuditMode::Remote => {
                    warn!(%err, "remote audit endpoint unavailable");
                }
                Err(err) => {
                    warn!(%err, "remote audit failed; local copy retained");
                }
            }
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;
    use pretty_assertions::assert_eq;

    fn sink_at(path: PathBuf, mode: AuditMode) -> AuditSink {
        AuditSink::new(&AuditConfig {
            mode,
            path,
            endpoint: None,
        })
    }

    #[test]
    fn local_mode_appends_jsonl_lines() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("audit.jsonl");
        let sink = sink_at(path.clone(), AuditMode::Local);

        sink.record(AuditEntry::new("ouro_prompt", "continue", "loop", "injected").with_turn(1));
        sink.record(AuditEntry::new("ouro_prompt", "again", "", "turn_limit_reached"));

        let raw = std::fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(first["tool"], "ouro_prompt");
        assert_eq!(first["turn"], 1);
        assert_eq!(first["outcome"], "injected");
        let second: serde_json::Value = serde_json::from_str(lines[1]).expect("json");
        assert_eq!(second["outcome"], "turn_limit_reached");
        assert!(second.get("turn").is_none());
    }

    #[test]
    fn unwritable_path_is_swallowed() {
        let sink = sink_at(PathBuf::from("/nonexistent-dir/audit.jsonl"), AuditMode::Local);
        // Must not panic or error.
        sink.record(AuditEntry::new("ouro_prompt", "x", "", "injected"));
    }

    #[tokio::test]
    async fn remote_mode_without_endpoint_is_a_noop() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("audit.jsonl");
        let sink = sink_at(path.clone(), AuditMode::Remote);
        sink.record(AuditEntry::new("ouro_prompt", "x", "", "injected"));
        assert!(!path.exists());
    }

    #[test]
    fn mode_can_be_switched_at_runtime() {
        let dir = tempfile::tempdir().expect("tmp");
        let sink = sink_at(dir.path().join("audit.jsonl"), AuditMode::Local);
        assert_eq!(sink.mode(), AuditMode::Local);
        sink.set_mode(AuditMode::Both);
        assert_eq!(sink.mode(), AuditMode::Both);
    }
}
