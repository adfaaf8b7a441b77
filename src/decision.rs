// =============================================================================
// Selection Decision — Auditable record of every arm assignment
// =============================================================================
//
// Every execution intent ends in exactly one SelectionDecision, whichever
// path produced it (scored, safe fallback, or guard-blocked). The value is
// cached by request id and replayed verbatim for duplicates.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::runtime_config::SafeFallbackConfig;
use crate::types::{ArmKey, DecisionMode, Variant};

/// Strategy name used for the sentinel arm of guard-blocked decisions.
pub const BLOCKED_SENTINEL: &str = "none";

/// Arm identity as published on the wire (timeframe lives on the decision).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedArm {
    pub name: String,
    pub variant: Variant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formation_tag: Option<String>,
}

impl From<&ArmKey> for SelectedArm {
    fn from(key: &ArmKey) -> Self {
        Self {
            name: key.strategy.clone(),
            variant: key.variant,
            formation_tag: key.formation_tag.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    pub min_confirm: u32,
    pub halt_entry: bool,
}

/// `strategy.selection.decision` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionDecision {
    pub request_id: String,
    pub symbol: String,
    pub timeframe: String,
    pub mode: DecisionMode,
    pub selected_arm: SelectedArm,
    pub allocation_pct: f64,
    pub policy_version: u64,
    pub reason_codes: Vec<String>,
    pub constraints: Constraints,
    pub decided_at: DateTime<Utc>,
}

/// Request coordinates shared by every decision constructor.
#[derive(Debug, Clone, Copy)]
pub struct DecisionContext<'a> {
    pub request_id: &'a str,
    pub symbol: &'a str,
    pub timeframe: &'a str,
    pub policy_version: u64,
    pub now: DateTime<Utc>,
}

fn clamp_pct(pct: f64) -> f64 {
    if pct.is_finite() {
        pct.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

impl SelectionDecision {
    /// A scored decision for a bandit arm.
    pub fn selected(
        ctx: DecisionContext<'_>,
        arm: &ArmKey,
        mode: DecisionMode,
        allocation_pct: f64,
        reason_codes: Vec<String>,
        min_confirm: u32,
    ) -> Self {
        Self {
            request_id: ctx.request_id.to_string(),
            symbol: ctx.symbol.to_string(),
            timeframe: ctx.timeframe.to_string(),
            mode,
            selected_arm: SelectedArm::from(arm),
            allocation_pct: clamp_pct(allocation_pct),
            policy_version: ctx.policy_version,
            reason_codes,
            constraints: Constraints {
                min_confirm,
                halt_entry: false,
            },
            decided_at: ctx.now,
        }
    }

    /// Guard short-circuit: nothing may enter.
    pub fn blocked(ctx: DecisionContext<'_>, min_confirm: u32) -> Self {
        Self {
            request_id: ctx.request_id.to_string(),
            symbol: ctx.symbol.to_string(),
            timeframe: ctx.timeframe.to_string(),
            mode: DecisionMode::Blocked,
            selected_arm: SelectedArm {
                name: BLOCKED_SENTINEL.to_string(),
                variant: Variant::Conservative,
                formation_tag: None,
            },
            allocation_pct: 0.0,
            policy_version: ctx.policy_version,
            reason_codes: vec!["guard_blocked".to_string()],
            constraints: Constraints {
                min_confirm,
                halt_entry: true,
            },
            decided_at: ctx.now,
        }
    }

    /// No catalog arm survived eligibility: hand out the configured safe arm.
    pub fn safe_fallback(ctx: DecisionContext<'_>, fallback: &SafeFallbackConfig) -> Self {
        Self {
            request_id: ctx.request_id.to_string(),
            symbol: ctx.symbol.to_string(),
            timeframe: ctx.timeframe.to_string(),
            mode: DecisionMode::SafeFallback,
            selected_arm: SelectedArm {
                name: fallback.strategy.clone(),
                variant: fallback.variant,
                formation_tag: fallback.formation_tag.clone(),
            },
            allocation_pct: clamp_pct(fallback.allocation_pct),
            policy_version: ctx.policy_version,
            reason_codes: vec!["no_eligible_arms".to_string(), "safe_fallback".to_string()],
            constraints: Constraints {
                min_confirm: fallback.min_confirm,
                halt_entry: false,
            },
            decided_at: ctx.now,
        }
    }
}
