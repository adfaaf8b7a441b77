// =============================================================================
// Safety & Policy Reactors — Catalog, policy, incident and guard handlers
// =============================================================================
//
// Each reactor translates one inbound event into named mutations of the arm
// store or of the process-wide guard/policy state. None of them fail: an
// event that cannot be applied is reported back to the caller, which logs it
// and drops it.
// =============================================================================

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::arena::allocation;
use crate::arena::arm_store::{ArmStore, CatalogMeta};
use crate::events::{
    CatalogPayload, GuardDirectivePayload, IncidentPayload, IncidentPhase, PolicySnapshotPayload,
};
use crate::guard::{GuardState, PolicyState};
use crate::runtime_config::OrchestratorConfig;
use crate::types::ArmKey;

// ── Catalog ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CatalogOutcome {
    pub created: usize,
    pub refreshed: usize,
}

/// Register every (arm, timeframe) combination the catalog announces.
///
/// New arms start from the configured priors with the cold-start traffic
/// share and are immediately held against the latest policy snapshot.
pub fn apply_catalog(
    store: &mut ArmStore,
    policy: &PolicyState,
    cfg: &OrchestratorConfig,
    catalog: &CatalogPayload,
    now: DateTime<Utc>,
) -> CatalogOutcome {
    let mut outcome = CatalogOutcome::default();

    for entry in &catalog.arms {
        let meta = CatalogMeta {
            timeframes: entry.timeframes.clone(),
            fits: entry.fits.clone(),
            risk_class: entry.risk_class.clone(),
            min_samples_to_unlock: entry.min_samples_to_unlock,
            traffic_cap_pct: entry.traffic_cap_pct,
        };

        for timeframe in &entry.timeframes {
            let key = ArmKey::new(&entry.name, entry.variant, entry.formation_tag.clone(), timeframe);
            let (_, created) =
                store.get_or_create(key.clone(), meta.clone(), &cfg.priors, cfg.cold_start_traffic_pct, now);
            if created {
                outcome.created += 1;
                if !policy.variants.permits(key.variant) {
                    store.set_blocked(&key, true, now);
                }
            } else {
                outcome.refreshed += 1;
            }
        }
    }

    allocation::reallocate(store, cfg, now);

    info!(
        entries = catalog.arms.len(),
        created = outcome.created,
        refreshed = outcome.refreshed,
        total_arms = store.len(),
        "strategy catalog ingested"
    );
    outcome
}

// ── Policy ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyOutcome {
    Applied { blocked: usize, unblocked: usize },
    Stale { current: u64, received: u64 },
}

/// Replace the retained policy and re-evaluate every arm against it.
///
/// Blocks are never accumulated: each arm's flag is recomputed from the
/// latest snapshot alone, so a newer snapshot re-permitting a variant
/// unblocks its arms.
pub fn apply_policy(
    store: &mut ArmStore,
    policy: &mut PolicyState,
    snapshot: &PolicySnapshotPayload,
    now: DateTime<Utc>,
) -> PolicyOutcome {
    if snapshot.version < policy.version {
        warn!(
            current = policy.version,
            received = snapshot.version,
            "stale policy snapshot ignored"
        );
        return PolicyOutcome::Stale {
            current: policy.version,
            received: snapshot.version,
        };
    }

    *policy = PolicyState {
        version: snapshot.version,
        variants: snapshot.policy.variants,
    };

    let mut blocked = 0;
    let mut unblocked = 0;
    for key in store.keys_where(|_| true) {
        let block = !policy.variants.permits(key.variant);
        if store.set_blocked(&key, block, now) {
            if block {
                blocked += 1;
            } else {
                unblocked += 1;
            }
        }
    }

    info!(
        version = policy.version,
        base = policy.variants.base,
        aggressive = policy.variants.aggressive,
        conservative = policy.variants.conservative,
        blocked,
        unblocked,
        "policy snapshot applied"
    );
    PolicyOutcome::Applied { blocked, unblocked }
}

// ── Incidents ────────────────────────────────────────────────────────────────

/// Put every arm in the incident's scope into cooldown.
///
/// Arms carry no symbol, so a symbol-scoped incident cools the matching arms
/// for every symbol. Returns the keys that were cooled, or `None` when the
/// cooldown end is not a representable instant (nothing is touched).
pub fn apply_incident(
    store: &mut ArmStore,
    cfg: &OrchestratorConfig,
    phase: IncidentPhase,
    incident: &IncidentPayload,
    now: DateTime<Utc>,
) -> Option<Vec<ArmKey>> {
    let scope = &incident.scope;
    let Some(until) = now.checked_add_signed(cfg.cooldown_for(&incident.incident_type)) else {
        warn!(
            incident = %incident.incident_type,
            phase = ?phase,
            now = %now,
            "incident cooldown end out of range, dropped"
        );
        return None;
    };

    let keys = store.keys_where(|arm| {
        let key = arm.key();
        scope.variant.map_or(true, |v| v == key.variant)
            && scope.timeframe.as_deref().map_or(true, |tf| tf == key.timeframe)
    });

    for key in &keys {
        store.set_cooldown(key, until, now);
    }

    if keys.is_empty() {
        warn!(
            incident = %incident.incident_type,
            phase = ?phase,
            symbol = scope.symbol.as_deref().unwrap_or("*"),
            timeframe = scope.timeframe.as_deref().unwrap_or("*"),
            variant = ?scope.variant,
            "incident matched no arm"
        );
    } else {
        info!(
            incident = %incident.incident_type,
            phase = ?phase,
            severity = incident.severity.as_deref().unwrap_or("unknown"),
            symbol = scope.symbol.as_deref().unwrap_or("*"),
            cooled = keys.len(),
            until = %until,
            "incident cooldown applied"
        );
    }
    Some(keys)
}

// ── Guard ────────────────────────────────────────────────────────────────────

/// Replace the guard state wholesale. Returns the previous state.
pub fn apply_guard(guard: &mut GuardState, directive: &GuardDirectivePayload, now: DateTime<Utc>) -> GuardState {
    let previous = *guard;
    *guard = GuardState::new(directive.mode, directive.expires_at);

    if directive.expires_at.is_some_and(|t| t <= now) {
        warn!(mode = %directive.mode, "guard directive already expired on arrival");
    }
    info!(
        from = %previous.effective_mode(now),
        to = %directive.mode,
        expires_at = ?directive.expires_at,
        "guard directive applied"
    );
    previous
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CatalogArm, IncidentScope, PolicyBody};
    use crate::guard::VariantPermissions;
    use crate::types::{GuardMode, Regime, Variant};
    use chrono::Duration;

    fn catalog() -> CatalogPayload {
        CatalogPayload {
            arms: Variant::ALL
                .iter()
                .map(|&variant| CatalogArm {
                    name: "momentum_pullback".into(),
                    variant,
                    formation_tag: None,
                    timeframes: vec!["M5".into(), "M15".into()],
                    fits: vec![Regime::Trend],
                    risk_class: "medium".into(),
                    min_samples_to_unlock: 10,
                    traffic_cap_pct: 40.0,
                })
                .collect(),
        }
    }

    fn policy(version: u64, aggressive: bool) -> PolicySnapshotPayload {
        PolicySnapshotPayload {
            version,
            policy: PolicyBody {
                variants: VariantPermissions {
                    aggressive,
                    ..VariantPermissions::default()
                },
            },
        }
    }

    #[test]
    fn catalog_creates_one_arm_per_timeframe() {
        let cfg = OrchestratorConfig::default();
        let mut store = ArmStore::new();
        let out = apply_catalog(&mut store, &PolicyState::default(), &cfg, &catalog(), Utc::now());
        assert_eq!(out.created, 6);
        assert_eq!(store.len(), 6);

        let again = apply_catalog(&mut store, &PolicyState::default(), &cfg, &catalog(), Utc::now());
        assert_eq!(again.created, 0);
        assert_eq!(again.refreshed, 6);
        assert_eq!(store.len(), 6);
    }

    #[test]
    fn catalog_arms_start_at_cold_start_share() {
        let cfg = OrchestratorConfig::default();
        let mut store = ArmStore::new();
        apply_catalog(&mut store, &PolicyState::default(), &cfg, &catalog(), Utc::now());
        for arm in store.iter() {
            assert!((arm.traffic_share_pct() - cfg.cold_start_traffic_pct).abs() < 1e-12);
        }
    }

    #[test]
    fn new_arms_respect_existing_policy() {
        let cfg = OrchestratorConfig::default();
        let mut store = ArmStore::new();
        let mut state = PolicyState::default();
        apply_policy(&mut store, &mut state, &policy(2, false), Utc::now());
        apply_catalog(&mut store, &state, &cfg, &catalog(), Utc::now());
        for arm in store.iter() {
            assert_eq!(arm.safety().blocked, arm.key().variant == Variant::Aggressive);
        }
    }

    #[test]
    fn newer_policy_unblocks_and_stale_is_ignored() {
        let cfg = OrchestratorConfig::default();
        let mut store = ArmStore::new();
        let mut state = PolicyState::default();
        apply_catalog(&mut store, &state, &cfg, &catalog(), Utc::now());

        let out = apply_policy(&mut store, &mut state, &policy(5, false), Utc::now());
        assert_eq!(out, PolicyOutcome::Applied { blocked: 2, unblocked: 0 });

        let out = apply_policy(&mut store, &mut state, &policy(4, true), Utc::now());
        assert_eq!(out, PolicyOutcome::Stale { current: 5, received: 4 });
        assert_eq!(store.iter().filter(|a| a.safety().blocked).count(), 2);

        let out = apply_policy(&mut store, &mut state, &policy(6, true), Utc::now());
        assert_eq!(out, PolicyOutcome::Applied { blocked: 0, unblocked: 2 });
        assert!(store.iter().all(|a| !a.safety().blocked));
        assert_eq!(state.version, 6);
    }

    #[test]
    fn incident_cools_scoped_arms() {
        let cfg = OrchestratorConfig::default();
        let mut store = ArmStore::new();
        let t = Utc::now();
        apply_catalog(&mut store, &PolicyState::default(), &cfg, &catalog(), t);

        let incident = IncidentPayload {
            incident_type: "series_loss".into(),
            severity: Some("high".into()),
            scope: IncidentScope {
                symbol: Some("BTCUSDT".into()),
                timeframe: Some("M5".into()),
                variant: Some(Variant::Aggressive),
            },
        };
        let cooled = apply_incident(&mut store, &cfg, IncidentPhase::Open, &incident, t).unwrap();
        assert_eq!(cooled.len(), 1);
        let arm = store.get(&cooled[0]).unwrap();
        assert_eq!(arm.safety().cooldown_until, Some(t + Duration::minutes(30)));
    }

    #[test]
    fn incident_update_re_arms_from_its_own_time() {
        let cfg = OrchestratorConfig::default();
        let mut store = ArmStore::new();
        let t = Utc::now();
        apply_catalog(&mut store, &PolicyState::default(), &cfg, &catalog(), t);
        let incident = IncidentPayload {
            incident_type: "drawdown_breach".into(),
            severity: None,
            scope: IncidentScope::default(),
        };
        apply_incident(&mut store, &cfg, IncidentPhase::Open, &incident, t);
        let later = t + Duration::minutes(20);
        let cooled = apply_incident(&mut store, &cfg, IncidentPhase::Update, &incident, later).unwrap();
        assert_eq!(cooled.len(), 6);
        for arm in store.iter() {
            assert_eq!(arm.safety().cooldown_until, Some(later + Duration::minutes(60)));
        }
    }

    #[test]
    fn incident_without_match_cools_nothing() {
        let cfg = OrchestratorConfig::default();
        let mut store = ArmStore::new();
        apply_catalog(&mut store, &PolicyState::default(), &cfg, &catalog(), Utc::now());
        let incident = IncidentPayload {
            incident_type: "execution_anomaly".into(),
            severity: None,
            scope: IncidentScope {
                timeframe: Some("H4".into()),
                ..IncidentScope::default()
            },
        };
        let cooled = apply_incident(&mut store, &cfg, IncidentPhase::Open, &incident, Utc::now());
        assert_eq!(cooled, Some(Vec::new()));
    }

    #[test]
    fn incident_at_end_of_time_leaves_arms_untouched() {
        let cfg = OrchestratorConfig::default();
        let mut store = ArmStore::new();
        apply_catalog(&mut store, &PolicyState::default(), &cfg, &catalog(), Utc::now());
        let incident = IncidentPayload {
            incident_type: "series_loss".into(),
            severity: None,
            scope: IncidentScope::default(),
        };
        let edge = DateTime::<Utc>::MAX_UTC - Duration::minutes(1);
        assert_eq!(apply_incident(&mut store, &cfg, IncidentPhase::Open, &incident, edge), None);
        assert!(store.iter().all(|a| a.safety().cooldown_until.is_none()));
    }

    #[test]
    fn guard_directive_replaces_state() {
        let t = Utc::now();
        let mut guard = GuardState::default();
        let prev = apply_guard(
            &mut guard,
            &GuardDirectivePayload {
                mode: GuardMode::HaltEntry,
                expires_at: Some(t + Duration::minutes(5)),
            },
            t,
        );
        assert_eq!(prev.mode, GuardMode::Normal);
        assert_eq!(guard.effective_mode(t), GuardMode::HaltEntry);

        apply_guard(
            &mut guard,
            &GuardDirectivePayload {
                mode: GuardMode::Slowdown,
                expires_at: None,
            },
            t,
        );
        assert_eq!(guard.effective_mode(t + Duration::hours(1)), GuardMode::Slowdown);
    }
}
