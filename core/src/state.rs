//! Process-wide session state for the autonomous loop.
//!
//! One instance lives for the whole process, owned by the orchestrator and
//! mutated only inside its critical section. `turn_count` moves once per
//! accepted request, never per completed OS write.

use std::collections::VecDeque;

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;

use crate::config::OuroConfig;

/// How many recent injections are kept for status reporting.
pub const RECENT_INJECTIONS_CAP: usize = 10;

/// Preview length stored per injection record.
const PREVIEW_MAX_CHARS: usize = 100;

/// One accepted injection, as surfaced by `ouro_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InjectionRecord {
    pub turn: u64,
    pub text_preview: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub turn_count: u64,
    pub turn_limit: u64,
    pub cooldown_ms: u64,
    /// `0.0` disables the budget guardrail.
    pub budget_usd: f64,
    pub cost_per_turn: f64,
    pub last_prompt_time: Option<DateTime<Utc>>,
    /// Set on the first accepted request, never cleared afterwards.
    pub session_start: Option<DateTime<Utc>>,
    recent: VecDeque<InjectionRecord>,
}

impl SessionState {
    pub fn from_config(config: &OuroConfig) -> Self {
        Self {
            turn_count: 0,
            turn_limit: config.turn_limit,
            cooldown_ms: config.cooldown_ms,
            budget_usd: config.budget_usd,
            cost_per_turn: config.cost_per_turn,
            last_prompt_time: None,
            session_start: None,
            recent: VecDeque::with_capacity(RECENT_INJECTIONS_CAP),
        }
    }

    /// Flat heuristic estimate of what the session has cost so far,
    /// rounded to cents. Not an accounting figure.
    pub fn estimated_cost(&self) -> f64 {
        round_cents(self.turn_count as f64 * self.cost_per_turn)
    }

    /// Apply the state mutation for an accepted request and return the new
    /// turn number. Must run under the same lock as the guardrail read.
    pub fn record_accepted(&mut self, text: &str, reason: &str, now: DateTime<Utc>) -> u64 {
        if self.session_start.is_none() {
            self.session_start = Some(now);
        }
        self.turn_count += 1;
        self.last_prompt_time = Some(now);
        if self.recent.len() == RECENT_INJECTIONS_CAP {
            self.recent.pop_front();
        }
        self.recent.push_back(InjectionRecord {
            turn: self.turn_count,
            text_preview: preview(text),
            reason: reason.to_string(),
            timestamp: now,
        });
        self.turn_count
    }

    /// Recent accepted injections, oldest first, at most
    /// [`RECENT_INJECTIONS_CAP`] entries.
    pub fn recent_injections(&self) -> Vec<InjectionRecord> {
        self.recent.iter().cloned().collect()
    }
}

pub(crate) fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn state() -> SessionState {
        SessionState::from_config(&OuroConfig::default())
    }

    #[test]
    fn recent_log_evicts_oldest_beyond_cap() {
        let mut state = state();
        state.turn_limit = 100;
        for i in 0..15 {
            state.record_accepted(&format!("prompt {i}"), "", Utc::now());
        }
        let recent = state.recent_injections();
        assert_eq!(recent.len(), RECENT_INJECTIONS_CAP);
        assert_eq!(recent[0].turn, 6);
        assert_eq!(recent[9].turn, 15);
    }

    #[test]
    fn session_start_is_set_once() {
        let mut state = state();
        let first = Utc::now();
        state.record_accepted("a", "", first);
        let started = state.session_start;
        assert_eq!(started, Some(first));
        state.record_accepted("b", "", Utc::now() + chrono::Duration::seconds(5));
        assert_eq!(state.session_start, started);
    }

    #[test]
    fn preview_is_capped_at_100_chars() {
        let mut state = state();
        let long = "x".repeat(500);
        state.record_accepted(&long, "loop", Utc::now());
        let recent = state.recent_injections();
        assert_eq!(recent[0].text_preview.len(), 100);
        assert_eq!(recent[0].reason, "loop");
    }

    #[test]
    fn estimated_cost_rounds_to_cents() {
        let mut state = state();
        state.turn_count = 34;
        state.cost_per_turn = 0.15;
        assert_eq!(state.estimated_cost(), 5.10);
    }
}
