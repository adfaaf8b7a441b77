// =============================================================================
// Orchestrator — Single writer over arms, guard and policy
// =============================================================================
//
// One `Orchestrator` value owns every piece of mutable decision state. It is
// driven through `handle`, one event at a time, by exactly one task (see
// `event_loop`). Each inbound tag has its own handler; all of them return a
// `HandleOutcome` and none of them can fail once the event has been decoded.
// =============================================================================

mod dispatcher;
mod idempotency;


use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::arena::allocation;
use crate::arena::arm_store::{ArmState, ArmStore};
use crate::decision::SelectionDecision;
use crate::events::{
    EventEnvelope, FeedbackPayload, InboundEvent, IncidentPayload, IncidentPhase, OutboundEvent,
    RegimeSnapshotPayload,
};
use crate::feedback::{self, FeedbackOutcome};
use crate::guard::{GuardState, PolicyState};
use crate::metrics::DecisionCounters;
use crate::reactors::{self, PolicyOutcome};
use crate::runtime_config::OrchestratorConfig;
use crate::types::{GuardMode, Regime};

use self::idempotency::{BoundedIdSet, DecisionCache};

// =============================================================================
// Outcomes
// =============================================================================

/// Why an event left no trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    UnknownArm,
    DuplicateFeedback,
    NoMatchingArms,
    StalePolicy,
    EvictedDuplicate,
    TimestampOutOfRange,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownArm => write!(f, "unknown_arm"),
            Self::DuplicateFeedback => write!(f, "duplicate_feedback"),
            Self::NoMatchingArms => write!(f, "no_matching_arms"),
            Self::StalePolicy => write!(f, "stale_policy"),
            Self::EvictedDuplicate => write!(f, "evicted_duplicate"),
            Self::TimestampOutOfRange => write!(f, "timestamp_out_of_range"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum HandleOutcome {
    /// The event was applied; these are the events it produced.
    Applied(Vec<OutboundEvent>),
    Dropped(DropReason),
}

impl HandleOutcome {
    pub fn events(&self) -> &[OutboundEvent] {
        match self {
            Self::Applied(events) => events,
            Self::Dropped(_) => &[],
        }
    }

    pub fn decision(&self) -> Option<&SelectionDecision> {
        self.events().iter().find_map(|e| match e {
            OutboundEvent::Decision(d) => Some(d),
            _ => None,
        })
    }
}

/// `strategy.bandit.state` payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BanditStateSnapshot {
    pub generated_at: DateTime<Utc>,
    pub policy: PolicyState,
    pub guard: GuardState,
    pub effective_guard_mode: GuardMode,
    pub arms: Vec<ArmState>,
}

impl BanditStateSnapshot {
    pub fn empty(at: DateTime<Utc>) -> Self {
        Self {
            generated_at: at,
            policy: PolicyState::default(),
            guard: GuardState::default(),
            effective_guard_mode: GuardMode::Normal,
            arms: Vec::new(),
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Wall-clock source. Safety gates are judged against this, never against a
/// caller's stamp.
pub type Clock = Box<dyn Fn() -> DateTime<Utc> + Send>;

/// Furthest an envelope `ts` may sit from the clock, either way.
pub const MAX_STAMP_SKEW_HOURS: i64 = 24;

pub struct Orchestrator {
    cfg: OrchestratorConfig,
    clock: Clock,
    store: ArmStore,
    guard: GuardState,
    policy: PolicyState,
    /// Latest regime per (symbol, timeframe).
    regimes: HashMap<(String, String), Regime>,
    processed: BoundedIdSet,
    decisions: DecisionCache,
    feedback_seen: BoundedIdSet,
    counters: DecisionCounters,
}

impl Orchestrator {
    pub fn new(cfg: OrchestratorConfig) -> Self {
        Self::with_clock(cfg, Box::new(Utc::now))
    }

    pub fn with_clock(cfg: OrchestratorConfig, clock: Clock) -> Self {
        Self {
            clock,
            processed: BoundedIdSet::new(cfg.processed_ids_capacity),
            decisions: DecisionCache::new(cfg.decision_cache_size),
            feedback_seen: BoundedIdSet::new(cfg.feedback_dedup_capacity),
            store: ArmStore::new(),
            guard: GuardState::default(),
            policy: PolicyState::default(),
            regimes: HashMap::new(),
            counters: DecisionCounters::default(),
            cfg,
        }
    }

    #[cfg(test)]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.cfg
    }

    pub fn store(&self) -> &ArmStore {
        &self.store
    }

    #[cfg(test)]
    pub fn policy(&self) -> PolicyState {
        self.policy
    }

    pub fn counters(&self) -> DecisionCounters {
        self.counters
    }

    pub fn cached_regime(&self, symbol: &str, timeframe: &str) -> Option<Regime> {
        self.regimes
            .get(&(symbol.to_string(), timeframe.to_string()))
            .copied()
    }

    pub fn state_snapshot(&self, now: DateTime<Utc>) -> BanditStateSnapshot {
        BanditStateSnapshot {
            generated_at: now,
            policy: self.policy,
            guard: self.guard,
            effective_guard_mode: self.guard.effective_mode(now),
            arms: self.store.iter().cloned().collect(),
        }
    }

    #[cfg(test)]
    pub fn metrics(&self, now: DateTime<Utc>) -> crate::metrics::MetricsSnapshot {
        crate::metrics::MetricsSnapshot::compute(&self.counters, self.store.iter(), now)
    }

    /// Decode and handle a raw JSON envelope. Rejected events leave no trace.
    #[cfg(test)]
    pub fn handle_json(&mut self, raw: serde_json::Value) -> Result<HandleOutcome, crate::errors::EventError> {
        match EventEnvelope::decode(raw.clone()) {
            Ok(envelope) => Ok(self.handle(envelope)),
            Err(e) => {
                warn!(error = %e, payload = %raw, "inbound event rejected");
                Err(e)
            }
        }
    }

    /// Route one decoded event to its handler.
    pub fn handle(&mut self, envelope: EventEnvelope) -> HandleOutcome {
        let Some(now) = self.event_time(envelope.ts) else {
            warn!(
                event = envelope.event.kind(),
                ts = ?envelope.ts,
                "event timestamp too far from the clock, dropped"
            );
            return HandleOutcome::Dropped(DropReason::TimestampOutOfRange);
        };

        match envelope.event {
            InboundEvent::Catalog(catalog) => {
                reactors::apply_catalog(&mut self.store, &self.policy, &self.cfg, &catalog, now);
                self.state_changed(now)
            }
            InboundEvent::PolicySnapshot(snapshot) => {
                match reactors::apply_policy(&mut self.store, &mut self.policy, &snapshot, now) {
                    PolicyOutcome::Stale { .. } => HandleOutcome::Dropped(DropReason::StalePolicy),
                    PolicyOutcome::Applied { .. } => self.state_changed(now),
                }
            }
            InboundEvent::RegimeSnapshot(snapshot) => self.on_regime(snapshot),
            InboundEvent::Feedback(fb) => self.on_feedback(fb, now),
            InboundEvent::Incident(phase, incident) => self.on_incident(phase, incident, now),
            InboundEvent::GuardDirective(directive) => {
                reactors::apply_guard(&mut self.guard, &directive, now);
                self.state_changed(now)
            }
            InboundEvent::IntentRequest(request) => self.dispatch(request, now),
        }
    }

    /// Instant an event is applied at: its stamp, capped at the clock so a
    /// future stamp cannot run a cooldown or guard expiry out early.
    fn event_time(&self, stamp: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        let wall = (self.clock)();
        let Some(ts) = stamp else {
            return Some(wall);
        };
        let skew = Duration::hours(MAX_STAMP_SKEW_HOURS);
        if ts > wall + skew || ts < wall - skew {
            return None;
        }
        Some(ts.min(wall))
    }

    // ── Handlers ─────────────────────────────────────────────────────────────

    fn on_regime(&mut self, snapshot: RegimeSnapshotPayload) -> HandleOutcome {
        let previous = self
            .regimes
            .insert((snapshot.symbol.clone(), snapshot.timeframe.clone()), snapshot.regime);
        if previous != Some(snapshot.regime) {
            info!(
                symbol = %snapshot.symbol,
                timeframe = %snapshot.timeframe,
                regime = %snapshot.regime,
                "regime updated"
            );
        }
        HandleOutcome::Applied(Vec::new())
    }

    fn on_feedback(&mut self, fb: FeedbackPayload, now: DateTime<Utc>) -> HandleOutcome {
        if let Some(id) = fb.feedback_id.as_deref() {
            if self.feedback_seen.contains(id) {
                warn!(feedback_id = id, "duplicate feedback dropped");
                return HandleOutcome::Dropped(DropReason::DuplicateFeedback);
            }
        }

        match feedback::ingest(&mut self.store, &self.cfg, &fb, now) {
            FeedbackOutcome::UnknownScope => HandleOutcome::Dropped(DropReason::UnknownArm),
            FeedbackOutcome::Applied(_) => {
                if let Some(id) = fb.feedback_id.as_deref() {
                    self.feedback_seen.insert(id);
                }
                allocation::reallocate(&mut self.store, &self.cfg, now);
                if self.cfg.broadcast_state_on_feedback {
                    self.state_changed(now)
                } else {
                    HandleOutcome::Applied(Vec::new())
                }
            }
        }
    }

    fn on_incident(&mut self, phase: IncidentPhase, incident: IncidentPayload, now: DateTime<Utc>) -> HandleOutcome {
        match reactors::apply_incident(&mut self.store, &self.cfg, phase, &incident, now) {
            None => HandleOutcome::Dropped(DropReason::TimestampOutOfRange),
            Some(cooled) if cooled.is_empty() => HandleOutcome::Dropped(DropReason::NoMatchingArms),
            Some(_) => self.state_changed(now),
        }
    }

    fn state_changed(&self, now: DateTime<Utc>) -> HandleOutcome {
        HandleOutcome::Applied(vec![OutboundEvent::BanditState(self.state_snapshot(now))])
    }
}
