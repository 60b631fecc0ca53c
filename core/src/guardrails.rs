//! Guardrail checks gating every injection.
//!
//! Three order-significant, fail-fast checks. Turn limit and budget are
//! session-ending conditions and surface before a transient cooldown.
//! Breaches are expected outcomes, returned as typed values, never panics.

use chrono::DateTime;
use chrono::Utc;
use thiserror::Error;

use crate::state::SessionState;
use crate::state::round_cents;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GuardrailBreach {
    #[error(
        "turn limit reached ({turn_limit}); use ouro_configure to raise it or end the autonomous session"
    )]
    TurnLimitReached { turn_count: u64, turn_limit: u64 },
    #[error(
        "estimated cost ${estimated_cost_usd:.2} exceeds budget ${budget_usd:.2}; use ouro_configure to raise budget_usd"
    )]
    BudgetExceeded {
        estimated_cost_usd: f64,
        budget_usd: f64,
        turn_count: u64,
    },
    #[error("cooldown active ({cooldown_ms}ms between injections)")]
    CooldownActive { cooldown_ms: u64 },
}

impl GuardrailBreach {
    /// Machine-readable code surfaced to callers.
    pub fn code(&self) -> &'static str {
        match self {
            GuardrailBreach::TurnLimitReached { .. } => "TURN_LIMIT_REACHED",
            GuardrailBreach::BudgetExceeded { .. } => "BUDGET_EXCEEDED",
            GuardrailBreach::CooldownActive { .. } => "COOLDOWN_ACTIVE",
        }
    }
}

/// Run all checks in order; the first breach wins and the rest are skipped.
pub fn evaluate(state: &SessionState, now: DateTime<Utc>) -> Result<(), GuardrailBreach> {
    check_turn_limit(state)?;
    check_budget(state)?;
    check_cooldown(state, now)
}

fn check_turn_limit(state: &SessionState) -> Result<(), GuardrailBreach> {
    if state.turn_count >= state.turn_limit {
        return Err(GuardrailBreach::TurnLimitReached {
            turn_count: state.turn_count,
            turn_limit: state.turn_limit,
        });
    }
    Ok(())
}

/// Skipped entirely when no budget is set. The estimate deliberately uses
/// the turn count before the current request is counted.
fn check_budget(state: &SessionState) -> Result<(), GuardrailBreach> {
    if state.budget_usd <= 0.0 {
        return Ok(());
    }
    let estimated = state.turn_count as f64 * state.cost_per_turn;
    if estimated >= state.budget_usd {
        return Err(GuardrailBreach::BudgetExceeded {
            estimated_cost_usd: round_cents(estimated),
            budget_usd: state.budget_usd,
            turn_count: state.turn_count,
        });
    }
    Ok(())
}

fn check_cooldown(state: &SessionState, now: DateTime<Utc>) -> Result<(), GuardrailBreach> {
    let Some(last) = state.last_prompt_time else {
        return Ok(());
    };
    let elapsed_ms = now.signed_duration_since(last).num_milliseconds();
    if elapsed_ms < state.cooldown_ms as i64 {
        return Err(GuardrailBreach::CooldownActive {
            cooldown_ms: state.cooldown_ms,
        });
    }
    Ok(())
}
