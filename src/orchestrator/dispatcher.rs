// =============================================================================
// Decision Dispatcher — Idempotent handling of execution intents
// =============================================================================
//
//   received
//     → duplicate?        replay cached decision (never recomputed)
//     → guard halts?      blocked
//     → eligibility       empty? safe_fallback
//     → score & select    explore / exploit
//     → remember + count
// =============================================================================

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::arena::sampling::DecisionRng;
use crate::arena::scoring;
use crate::decision::{DecisionContext, SelectionDecision};
use crate::eligibility::{self, EligibilityContext};
use crate::events::{IntentRequestPayload, OutboundEvent};
use crate::types::{GuardMode, Regime};

use super::{DropReason, HandleOutcome, Orchestrator};

impl Orchestrator {
    pub(super) fn dispatch(&mut self, request: IntentRequestPayload, now: DateTime<Utc>) -> HandleOutcome {
        let request_id = request.audit.request_id.as_str();

        if self.processed.contains(request_id) {
            return match self.decisions.get(request_id) {
                Some(cached) => {
                    info!(request_id, mode = %cached.mode, "duplicate request replayed");
                    HandleOutcome::Applied(vec![OutboundEvent::Decision(cached.clone())])
                }
                None => {
                    warn!(request_id, "duplicate request no longer cached, dropped");
                    HandleOutcome::Dropped(DropReason::EvictedDuplicate)
                }
            };
        }

        let decision = self.decide(&request, now);

        info!(
            request_id = %decision.request_id,
            symbol = %decision.symbol,
            timeframe = %decision.timeframe,
            mode = %decision.mode,
            arm = %decision.selected_arm.name,
            variant = %decision.selected_arm.variant,
            allocation_pct = decision.allocation_pct,
            reasons = ?decision.reason_codes,
            "selection decision"
        );

        self.counters.record(decision.mode);
        self.processed.insert(&decision.request_id);
        self.decisions.insert(decision.clone());
        debug!(
            processed = self.processed.len(),
            cached = self.decisions.len(),
            "idempotency window"
        );

        HandleOutcome::Applied(vec![OutboundEvent::Decision(decision)])
    }

    /// Compute a fresh decision. Reads state only.
    fn decide(&self, request: &IntentRequestPayload, now: DateTime<Utc>) -> SelectionDecision {
        let ctx = DecisionContext {
            request_id: &request.audit.request_id,
            symbol: &request.symbol,
            timeframe: &request.timeframe,
            policy_version: self.policy.version,
            now,
        };

        let guard_mode = self.guard.effective_mode(now);
        if guard_mode.halts_entry() {
            return SelectionDecision::blocked(ctx, self.cfg.default_min_confirm);
        }

        let regime = request
            .context
            .regime
            .or_else(|| self.cached_regime(&request.symbol, &request.timeframe))
            .unwrap_or(Regime::Range);

        let filter_ctx = EligibilityContext {
            timeframe: &request.timeframe,
            regime,
            guard_mode,
            policy: &self.policy,
            now,
        };
        let eligibility = eligibility::filter(&self.store, &filter_ctx, &self.cfg);
        if eligibility.is_empty() {
            warn!(
                request_id = %request.audit.request_id,
                timeframe = %request.timeframe,
                regime = %regime,
                excluded = eligibility.excluded.len(),
                "no eligible arms, using safe fallback"
            );
            return SelectionDecision::safe_fallback(ctx, &self.cfg.safe_fallback);
        }

        let mut rng = DecisionRng::for_request(
            self.cfg.rng_seed,
            &request.symbol,
            &request.timeframe,
            &request.audit.request_id,
        );
        let Some(selection) = scoring::select(&eligibility.eligible, regime, &self.cfg, &mut rng) else {
            return SelectionDecision::safe_fallback(ctx, &self.cfg.safe_fallback);
        };

        let mut allocation = selection.arm.traffic_share_pct();
        let mut reasons = selection.reason_codes;
        match guard_mode {
            GuardMode::Slowdown => {
                allocation *= self.cfg.slowdown_allocation_factor;
                reasons.push("guard_slowdown".to_string());
            }
            GuardMode::Degraded => {
                allocation *= self.cfg.slowdown_allocation_factor;
                reasons.push("guard_degraded".to_string());
            }
            _ => {}
        }

        SelectionDecision::selected(
            ctx,
            selection.arm.key(),
            selection.mode,
            allocation,
            reasons,
            self.cfg.default_min_confirm,
        )
    }
}
