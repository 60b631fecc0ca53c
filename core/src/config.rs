//! Configuration loading for the server.
//!
//! `ouro.toml` in the working directory overrides the defaults; a missing
//! or malformed file falls back to defaults with a warning, since a config
//! problem should never keep the server from starting.

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::info;
use tracing::warn;

use crate::audit::AuditMode;

pub const CONFIG_FILE_NAME: &str = "ouro.toml";

pub const DEFAULT_TURN_LIMIT: u64 = 20;
pub const DEFAULT_COOLDOWN_MS: u64 = 1000;
pub const DEFAULT_BUDGET_USD: f64 = 5.00;
/// Rough per-turn cost heuristic; override in config for other models.
pub const DEFAULT_COST_PER_TURN: f64 = 0.15;
pub const DEFAULT_SIDECAR_PORT: u16 = 7839;
pub const DEFAULT_AUDIT_FILE: &str = "ouro_audit.jsonl";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OuroConfig {
    pub turn_limit: u64,
    pub cooldown_ms: u64,
    pub budget_usd: f64,
    pub cost_per_turn: f64,
    pub audit: AuditConfig,
    pub sidecar: SidecarConfig,
}

impl Default for OuroConfig {
    fn default() -> Self {
        Self {
            turn_limit: DEFAULT_TURN_LIMIT,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            budget_usd: DEFAULT_BUDGET_USD,
            cost_per_turn: DEFAULT_COST_PER_TURN,
            audit: AuditConfig::default(),
            sidecar: SidecarConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub mode: AuditMode,
    pub path: PathBuf,
    /// HTTP endpoint for remote audit forwarding; unused in local mode.
    pub endpoint: Option<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            mode: AuditMode::Local,
            path: PathBuf::from(DEFAULT_AUDIT_FILE),
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: DEFAULT_SIDECAR_PORT,
        }
    }
}

impl OuroConfig {
    /// Load from `path`, falling back to defaults when the file is absent
    /// or does not parse.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => match toml::from_str::<OuroConfig>(&raw) {
                Ok(config) => {
                    info!(path = %path.display(), "loaded config");
                    config
                }
                Err(err) => {
                    warn!(path = %path.display(), %err, "config did not parse; using defaults");
                    OuroConfig::default()
                }
            },
            Err(_) => OuroConfig::default(),
        }
    }

    pub fn load_default() -> Self {
        Self::load(Path::new(CONFIG_FILE_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tmp");
        let config = OuroConfig::load(&dir.path().join("nope.toml"));
        assert_eq!(config, OuroConfig::default());
        assert_eq!(config.turn_limit, 20);
        assert_eq!(config.cooldown_ms, 1000);
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"
turn_limit = 50
budget_usd = 12.5

[sidecar]
enabled = true
"#,
        )
        .expect("write");
        let config = OuroConfig::load(&path);
        assert_eq!(config.turn_limit, 50);
        assert_eq!(config.budget_usd, 12.5);
        assert_eq!(config.cooldown_ms, DEFAULT_COOLDOWN_MS);
        assert!(config.sidecar.enabled);
        assert_eq!(config.sidecar.port, DEFAULT_SIDECAR_PORT);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "turn_limit = [not toml").expect("write");
        assert_eq!(OuroConfig::load(&path), OuroConfig::default());
    }

    #[test]
    fn audit_section_parses() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"
[audit]
mode = "both"
path = "audit/run.jsonl"
endpoint = "http://127.0.0.1:8000/memory_store"
"#,
        )
        .expect("write");
        let config = OuroConfig::load(&path);
        assert_eq!(config.audit.mode, AuditMode::Both);
        assert_eq!(config.audit.path, PathBuf::from("audit/run.jsonl"));
        assert_eq!(
            config.audit.endpoint.as_deref(),
            Some("http://127.0.0.1:8000/memory_store")
        );
    }
}
