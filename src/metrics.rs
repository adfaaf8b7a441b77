// =============================================================================
// Bandit Metrics — Aggregate decision counters and periodic flush
// =============================================================================
//
// Counters are cumulative since process start and are owned by the
// orchestrator. The flush loop runs on its own timer and only reads the
// snapshot the orchestrator task last published; it never touches the write
// path.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::{interval, Duration};
use tracing::{debug, info};

use crate::app_state::AppState;
use crate::arena::arm_store::ArmState;
use crate::events::OutboundEvent;
use crate::types::DecisionMode;

/// Decisions issued since start, by mode. Replays are not counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionCounters {
    pub total: u64,
    pub explore: u64,
    pub exploit: u64,
    pub blocked: u64,
    pub safe_fallback: u64,
}

impl DecisionCounters {
    pub fn record(&mut self, mode: DecisionMode) {
        self.total += 1;
        match mode {
            DecisionMode::Explore => self.explore += 1,
            DecisionMode::Exploit => self.exploit += 1,
            DecisionMode::Blocked => self.blocked += 1,
            DecisionMode::SafeFallback => self.safe_fallback += 1,
        }
    }
}

/// `strategy.bandit.metrics` payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub explore_rate: f64,
    pub blocked_rate: f64,
    pub avg_samples_per_arm: f64,
    pub cold_start_active: usize,
    pub decisions: DecisionCounters,
    pub arms: usize,
    pub at: DateTime<Utc>,
}

impl MetricsSnapshot {
    pub fn compute<'a>(
        counters: &DecisionCounters,
        arms: impl IntoIterator<Item = &'a ArmState>,
        at: DateTime<Utc>,
    ) -> Self {
        let mut n = 0usize;
        let mut samples = 0u64;
        let mut cold = 0usize;
        for arm in arms {
            n += 1;
            samples = samples.saturating_add(arm.samples());
            if arm.in_cold_start() {
                cold += 1;
            }
        }

        let rate = |count: u64| {
            if counters.total == 0 {
                0.0
            } else {
                count as f64 / counters.total as f64
            }
        };

        Self {
            explore_rate: rate(counters.explore),
            blocked_rate: rate(counters.blocked),
            avg_samples_per_arm: if n == 0 { 0.0 } else { samples as f64 / n as f64 },
            cold_start_active: cold,
            decisions: *counters,
            arms: n,
            at,
        }
    }
}

// =============================================================================
// Flush loop
// =============================================================================

/// Publish aggregate metrics every `period` until the bus closes.
pub async fn run_flush_loop(state: Arc<AppState>, period: Duration) {
    let mut ticker = interval(period);
    // The first tick fires immediately; skip it so the first flush has data.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let snapshot = {
            let bandit = state.bandit_state.read();
            let counters = *state.counters.read();
            MetricsSnapshot::compute(&counters, bandit.arms.iter(), Utc::now())
        };

        info!(
            explore_rate = format!("{:.3}", snapshot.explore_rate),
            blocked_rate = format!("{:.3}", snapshot.blocked_rate),
            avg_samples = format!("{:.1}", snapshot.avg_samples_per_arm),
            cold_start_active = snapshot.cold_start_active,
            decisions = snapshot.decisions.total,
            "bandit metrics"
        );

        *state.metrics.write() = Some(snapshot.clone());
        if state.bus.send(OutboundEvent::BanditMetrics(snapshot)).is_err() {
            debug!("no subscribers for metrics flush");
        }
        state.increment_version();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::arm_store::tests::meta;
    use crate::arena::arm_store::{ArmStore, TradeOutcome};
    use crate::runtime_config::Priors;
    use crate::types::{ArmKey, Regime, Variant};

    #[test]
    fn empty_metrics_are_zero() {
        let m = MetricsSnapshot::compute(&DecisionCounters::default(), std::iter::empty(), Utc::now());
        assert_eq!(m.explore_rate, 0.0);
        assert_eq!(m.blocked_rate, 0.0);
        assert_eq!(m.avg_samples_per_arm, 0.0);
        assert_eq!(m.cold_start_active, 0);
    }

    #[test]
    fn rates_and_averages() {
        let mut counters = DecisionCounters::default();
        for mode in [
            DecisionMode::Explore,
            DecisionMode::Explore,
            DecisionMode::Exploit,
            DecisionMode::Blocked,
        ] {
            counters.record(mode);
        }

        let mut store = ArmStore::new();
        let a = ArmKey::new("a", Variant::Base, None, "M5");
        let b = ArmKey::new("b", Variant::Base, None, "M5");
        for key in [&a, &b] {
            store.get_or_create(key.clone(), meta(&["M5"], &[Regime::Trend]), &Priors::default(), 10.0, Utc::now());
        }
        for _ in 0..12 {
            store.apply_feedback(&a, TradeOutcome { hit: 1.0, r_multiple: 1.0 }, 1e-4, Utc::now());
        }

        let m = MetricsSnapshot::compute(&counters, store.iter(), Utc::now());
        assert!((m.explore_rate - 0.5).abs() < 1e-12);
        assert!((m.blocked_rate - 0.25).abs() < 1e-12);
        assert!((m.avg_samples_per_arm - 6.0).abs() < 1e-12);
        // `a` passed its unlock threshold of 10, `b` did not.
        assert_eq!(m.cold_start_active, 1);
        assert_eq!(m.arms, 2);
    }

    #[test]
    fn wire_format() {
        let m = MetricsSnapshot::compute(&DecisionCounters::default(), std::iter::empty(), Utc::now());
        let v = serde_json::to_value(&m).unwrap();
        assert!(v.get("exploreRate").is_some());
        assert!(v.get("blockedRate").is_some());
        assert!(v.get("avgSamplesPerArm").is_some());
        assert!(v.get("coldStartActive").is_some());
    }
}
