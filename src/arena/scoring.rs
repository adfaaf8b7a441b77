// =============================================================================
// Scoring & Selection — Hybrid Thompson / UCB with regime fit
// =============================================================================
//
// Per eligible arm, in eligibility order:
//
//   hitRateSample   ~ Beta(alpha, beta)
//   rMeanSample     ~ Gaussian(mu, sigma)
//   thompson        = hitRateSample * max(0, rMeanSample)
//   width           = ucbZ * sigma / sqrt(max(1, samples))
//   ucb             = mu + width
//   hybrid          = 0.7 * thompson + 0.3 * max(0, ucb)
//   adjusted        = hybrid + (fits ? +bonus : -penalty) - (highVol ? hvPenalty : 0)
//
// Highest adjusted score wins; on a tie the first arm seen keeps the lead.
// =============================================================================

use serde::Serialize;
use tracing::debug;

use crate::arena::arm_store::ArmState;
use crate::arena::sampling::DecisionRng;
use crate::runtime_config::OrchestratorConfig;
use crate::types::{DecisionMode, Regime};

const THOMPSON_WEIGHT: f64 = 0.7;
const UCB_WEIGHT: f64 = 0.3;

/// Score breakdown for one arm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmScore {
    pub hit_rate_sample: f64,
    pub r_mean_sample: f64,
    pub thompson: f64,
    pub ucb: f64,
    pub hybrid: f64,
    pub regime_match: bool,
    pub adjusted: f64,
}

/// Winner of one selection round.
#[derive(Debug, Clone)]
pub struct Selection<'s> {
    pub arm: &'s ArmState,
    pub score: ArmScore,
    pub mode: DecisionMode,
    pub reason_codes: Vec<String>,
}

/// Score one arm, consuming two draws from `rng`.
pub fn score_arm(arm: &ArmState, regime: Regime, cfg: &OrchestratorConfig, rng: &mut DecisionRng) -> ArmScore {
    let hit = arm.hit_rate();
    let r = arm.r_mean();

    let hit_rate_sample = rng.beta(hit.alpha, hit.beta);
    let r_mean_sample = rng.gaussian(r.mu, r.sigma);
    let thompson = hit_rate_sample * r_mean_sample.max(0.0);

    let width = cfg.ucb_z * r.sigma / (arm.samples().max(1) as f64).sqrt();
    let ucb = r.mu + width;

    let hybrid = THOMPSON_WEIGHT * thompson + UCB_WEIGHT * ucb.max(0.0);

    let regime_match = arm.catalog().fits_regime(regime);
    let mut adjusted = hybrid;
    if regime_match {
        adjusted += cfg.regime_match_bonus;
    } else {
        adjusted -= cfg.regime_mismatch_penalty;
    }
    if regime == Regime::HighVol {
        adjusted -= cfg.high_vol_penalty;
    }

    ArmScore {
        hit_rate_sample,
        r_mean_sample,
        thompson,
        ucb,
        hybrid,
        regime_match,
        adjusted,
    }
}

/// Score every candidate and pick the best. `None` only for an empty slice.
pub fn select<'s>(
    candidates: &[&'s ArmState],
    regime: Regime,
    cfg: &OrchestratorConfig,
    rng: &mut DecisionRng,
) -> Option<Selection<'s>> {
    let mut best: Option<(&'s ArmState, ArmScore)> = None;

    for &arm in candidates {
        let score = score_arm(arm, regime, cfg, rng);
        debug!(
            arm = %arm.key(),
            thompson = format!("{:.4}", score.thompson),
            ucb = format!("{:.4}", score.ucb),
            adjusted = format!("{:.4}", score.adjusted),
            "arm scored"
        );

        // NaN never beats anything, so a poisoned score cannot win.
        let better = match &best {
            None => !score.adjusted.is_nan(),
            Some((_, lead)) => score.adjusted > lead.adjusted,
        };
        if better {
            best = Some((arm, score));
        }
    }

    let (arm, score) = best.or_else(|| candidates.first().map(|&a| (a, score_arm(a, regime, cfg, rng))))?;

    let mode = if arm.samples() < cfg.min_samples_to_exploit {
        DecisionMode::Explore
    } else {
        DecisionMode::Exploit
    };

    let mut reason_codes = Vec::with_capacity(4);
    reason_codes.push(match mode {
        DecisionMode::Explore => "thompson_explore".to_string(),
        _ => "thompson_exploit".to_string(),
    });
    reason_codes.push(if score.regime_match {
        "regime_match".to_string()
    } else {
        "regime_mismatch".to_string()
    });
    if regime == Regime::HighVol {
        reason_codes.push("high_vol_penalty".to_string());
    }
    if arm.in_cold_start() {
        reason_codes.push("cold_start".to_string());
    }

    Some(Selection {
        arm,
        score,
        mode,
        reason_codes,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::arm_store::tests::meta;
    use crate::arena::arm_store::{ArmStore, TradeOutcome};
    use crate::types::{ArmKey, Variant};
    use chrono::Utc;

    fn store() -> ArmStore {
        let cfg = OrchestratorConfig::default();
        let mut store = ArmStore::new();
        let now = Utc::now();
        store.get_or_create(
            ArmKey::new("trend_rider", Variant::Base, None, "M5"),
            meta(&["M5"], &[Regime::Trend]),
            &cfg.priors,
            10.0,
            now,
        );
        store.get_or_create(
            ArmKey::new("range_fader", Variant::Base, None, "M5"),
            meta(&["M5"], &[Regime::Range]),
            &cfg.priors,
            10.0,
            now,
        );
        store
    }

    fn feed(store: &mut ArmStore, key: &ArmKey, n: usize, hit: f64, r: f64) {
        for _ in 0..n {
            store.apply_feedback(key, TradeOutcome { hit, r_multiple: r }, 1e-4, Utc::now());
        }
    }

    #[test]
    fn ucb_width_shrinks_with_samples() {
        let cfg = OrchestratorConfig::default();
        let mut store = store();
        let key = ArmKey::new("trend_rider", Variant::Base, None, "M5");

        let mut rng = DecisionRng::from_seed(1);
        let fresh = score_arm(store.get(&key).unwrap(), Regime::Trend, &cfg, &mut rng);
        // No samples: width == sigma.
        assert!((fresh.ucb - 1.0).abs() < 1e-12);

        // Alternate R so sigma stays > 0 and mu is 0.5.
        for i in 0..16 {
            let r = if i % 2 == 0 { 0.0 } else { 1.0 };
            feed(&mut store, &key, 1, 1.0, r);
        }
        let arm = store.get(&key).unwrap();
        let expected = arm.r_mean().mu + arm.r_mean().sigma / 4.0;
        let warm = score_arm(arm, Regime::Trend, &cfg, &mut rng);
        assert!((warm.ucb - expected).abs() < 1e-12);
    }

    #[test]
    fn hybrid_combines_thompson_and_ucb() {
        let cfg = OrchestratorConfig::default();
        let store = store();
        let arm = store.iter().next().unwrap();
        let mut rng = DecisionRng::from_seed(99);
        let s = score_arm(arm, Regime::Trend, &cfg, &mut rng);
        let expected = 0.7 * s.hit_rate_sample * s.r_mean_sample.max(0.0) + 0.3 * s.ucb.max(0.0);
        assert!((s.hybrid - expected).abs() < 1e-12);
        assert!((s.adjusted - (s.hybrid + cfg.regime_match_bonus)).abs() < 1e-12);
    }

    #[test]
    fn high_vol_penalty_applies_regardless_of_fit() {
        let cfg = OrchestratorConfig::default();
        let mut s = ArmStore::new();
        let key = ArmKey::new("vol_rider", Variant::Base, None, "M5");
        s.get_or_create(key.clone(), meta(&["M5"], &[Regime::HighVol]), &cfg.priors, 10.0, Utc::now());
        let mut rng = DecisionRng::from_seed(5);
        let sc = score_arm(s.get(&key).unwrap(), Regime::HighVol, &cfg, &mut rng);
        assert!(sc.regime_match);
        let expected = sc.hybrid + cfg.regime_match_bonus - cfg.high_vol_penalty;
        assert!((sc.adjusted - expected).abs() < 1e-12);
    }

    #[test]
    fn selection_is_reproducible_for_same_seed() {
        let cfg = OrchestratorConfig::default();
        let store = store();
        let candidates: Vec<_> = store.iter().collect();

        let a = select(&candidates, Regime::Trend, &cfg, &mut DecisionRng::from_seed(77)).unwrap();
        let b = select(&candidates, Regime::Trend, &cfg, &mut DecisionRng::from_seed(77)).unwrap();
        assert_eq!(a.arm.key(), b.arm.key());
        assert_eq!(a.score, b.score);
    }

    #[test]
    fn fresh_arm_is_explore_with_reason_codes() {
        let cfg = OrchestratorConfig::default();
        let store = store();
        let trend = store.iter().next().unwrap();
        let sel = select(&[trend], Regime::Trend, &cfg, &mut DecisionRng::from_seed(3)).unwrap();
        assert_eq!(sel.mode, DecisionMode::Explore);
        assert!(sel.reason_codes.contains(&"thompson_explore".to_string()));
        assert!(sel.reason_codes.contains(&"regime_match".to_string()));
        assert!(sel.reason_codes.contains(&"cold_start".to_string()));
    }

    #[test]
    fn well_sampled_arm_is_exploit() {
        let cfg = OrchestratorConfig::default();
        let mut store = store();
        let key = ArmKey::new("range_fader", Variant::Base, None, "M5");
        feed(&mut store, &key, 30, 1.0, 1.0);
        let arm = store.get(&key).unwrap();
        let sel = select(&[arm], Regime::Trend, &cfg, &mut DecisionRng::from_seed(3)).unwrap();
        assert_eq!(sel.mode, DecisionMode::Exploit);
        assert_eq!(sel.reason_codes[0], "thompson_exploit");
        assert_eq!(sel.reason_codes[1], "regime_mismatch");
    }

    #[test]
    fn strong_arm_beats_weak_arm() {
        let cfg = OrchestratorConfig::default();
        let mut store = store();
        let strong = ArmKey::new("trend_rider", Variant::Base, None, "M5");
        let weak = ArmKey::new("range_fader", Variant::Base, None, "M5");
        feed(&mut store, &strong, 60, 1.0, 2.0);
        feed(&mut store, &weak, 60, 0.0, -1.0);
        let candidates: Vec<_> = store.iter().collect();
        for seed in 0..20 {
            let sel = select(&candidates, Regime::Range, &cfg, &mut DecisionRng::from_seed(seed)).unwrap();
            assert_eq!(sel.arm.key(), &strong);
        }
    }

    #[test]
    fn ties_go_to_first_seen() {
        let mut cfg = OrchestratorConfig::default();
        cfg.regime_match_bonus = 0.0;
        cfg.regime_mismatch_penalty = 0.0;
        let mut store = store();
        // Drive both arms to a deterministic zero score: every draw of
        // max(0, r) is 0 and mu + width stays negative.
        for key in store.keys_where(|_| true) {
            feed(&mut store, &key, 40, 0.0, -5.0);
        }
        let candidates: Vec<_> = store.iter().collect();
        let sel = select(&candidates, Regime::Trend, &cfg, &mut DecisionRng::from_seed(8)).unwrap();
        assert_eq!(sel.score.adjusted, 0.0);
        assert_eq!(sel.arm.key().strategy, "trend_rider");
    }

    #[test]
    fn empty_candidates_select_nothing() {
        let cfg = OrchestratorConfig::default();
        assert!(select(&[], Regime::Trend, &cfg, &mut DecisionRng::from_seed(0)).is_none());
    }
}
