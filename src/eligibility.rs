// =============================================================================
// Eligibility Filter — Hard gates before any arm may compete
// =============================================================================
//
// Gates, evaluated in order; the first failing gate excludes the arm:
//   1. Timeframe      — arm key and catalog timeframe list match the request
//   2. NotBlocked     — policy has not blocked the arm
//   3. NotCooling     — cooldownUntil, if set, is <= now
//   4. NotIlliquid    — illiquid regime with illiquid-block flag excludes all
//   5. AggressiveOk   — aggressive arms need a permissive guard and policy
//
// The surviving arms keep store insertion order. An empty result is not an
// error: the dispatcher turns it into a safe-fallback decision.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::arena::arm_store::{ArmState, ArmStore};
use crate::guard::PolicyState;
use crate::runtime_config::OrchestratorConfig;
use crate::types::{ArmKey, GuardMode, Regime, Variant};

/// Why an arm was excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Exclusion {
    Timeframe,
    Blocked,
    Cooldown,
    Illiquid,
    AggressiveRestricted,
}

impl std::fmt::Display for Exclusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeframe => write!(f, "timeframe"),
            Self::Blocked => write!(f, "blocked"),
            Self::Cooldown => write!(f, "cooldown"),
            Self::Illiquid => write!(f, "illiquid"),
            Self::AggressiveRestricted => write!(f, "aggressive_restricted"),
        }
    }
}

/// Everything the filter needs besides the store.
#[derive(Debug, Clone, Copy)]
pub struct EligibilityContext<'a> {
    pub timeframe: &'a str,
    pub regime: Regime,
    pub guard_mode: GuardMode,
    pub policy: &'a PolicyState,
    pub now: DateTime<Utc>,
}

/// Outcome of one filter pass.
#[derive(Debug)]
pub struct Eligibility<'s> {
    pub eligible: Vec<&'s ArmState>,
    /// Arms of the requested timeframe that were gated out, with the reason.
    pub excluded: Vec<(ArmKey, Exclusion)>,
}

impl Eligibility<'_> {
    pub fn is_empty(&self) -> bool {
        self.eligible.is_empty()
    }
}

/// Check one arm against every gate.
pub fn check_arm(arm: &ArmState, ctx: &EligibilityContext<'_>, cfg: &OrchestratorConfig) -> Option<Exclusion> {
    // Gate 1: timeframe
    if arm.key().timeframe != ctx.timeframe || !arm.catalog().allows_timeframe(ctx.timeframe) {
        return Some(Exclusion::Timeframe);
    }

    // Gate 2: policy block
    let safety = arm.safety();
    if safety.blocked {
        return Some(Exclusion::Blocked);
    }

    // Gate 3: incident cooldown
    if safety.cooling_down(ctx.now) {
        return Some(Exclusion::Cooldown);
    }

    // Gate 4: illiquid regime
    if ctx.regime == Regime::Illiquid && cfg.illiquid_blocks {
        return Some(Exclusion::Illiquid);
    }

    // Gate 5: aggressive variant restrictions
    if arm.key().variant == Variant::Aggressive {
        let guard_restricts = ctx.guard_mode.blocks_aggressive()
            || (cfg.block_aggressive_when_guard_non_normal && ctx.guard_mode != GuardMode::Normal);
        if guard_restricts || !ctx.policy.variants.permits(Variant::Aggressive) {
            return Some(Exclusion::AggressiveRestricted);
        }
    }

    None
}

/// Run the filter over the whole store.
pub fn filter<'s>(
    store: &'s ArmStore,
    ctx: &EligibilityContext<'_>,
    cfg: &OrchestratorConfig,
) -> Eligibility<'s> {
    let mut eligible = Vec::new();
    let mut excluded = Vec::new();

    for arm in store.iter() {
        match check_arm(arm, ctx, cfg) {
            None => eligible.push(arm),
            // Arms of other timeframes are not interesting to report.
            Some(Exclusion::Timeframe) if arm.key().timeframe != ctx.timeframe => {}
            Some(reason) => excluded.push((arm.key().clone(), reason)),
        }
    }

    debug!(
        timeframe = ctx.timeframe,
        regime = %ctx.regime,
        guard = %ctx.guard_mode,
        eligible = eligible.len(),
        excluded = excluded.len(),
        "eligibility evaluated"
    );

    Eligibility { eligible, excluded }
}

// =============================================================================
// Tests
// =============================================================================
