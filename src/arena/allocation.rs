// =============================================================================
// Traffic Allocation — Per-arm share ceilings
// =============================================================================
//
//   cold start  (samples < minSamplesToUnlock): min(coldStart, exploreCap)
//   warm                                      : max(exploreFloor, 100 * E[hit])
//
// The result is then clamped by the catalog cap, the global per-arm cap and
// the variant cap, and finally to [0, 100].
// =============================================================================

use chrono::{DateTime, Utc};

use crate::arena::arm_store::{ArmState, ArmStore};
use crate::runtime_config::OrchestratorConfig;

/// Target traffic share for one arm.
pub fn target_share_pct(arm: &ArmState, cfg: &OrchestratorConfig) -> f64 {
    let raw = if arm.in_cold_start() {
        cfg.cold_start_traffic_pct.min(cfg.explore_cap_pct)
    } else {
        (100.0 * arm.hit_rate().mean()).max(cfg.explore_floor_pct)
    };

    let capped = raw
        .min(arm.catalog().traffic_cap_pct)
        .min(cfg.max_arm_traffic_pct)
        .min(cfg.variant_caps_pct.cap_for(arm.key().variant));

    if capped.is_finite() {
        capped.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Recompute every arm's share. Returns how many arms changed.
pub fn reallocate(store: &mut ArmStore, cfg: &OrchestratorConfig, now: DateTime<Utc>) -> usize {
    let targets: Vec<_> = store
        .iter()
        .map(|arm| (arm.key().clone(), target_share_pct(arm, cfg)))
        .collect();

    targets
        .into_iter()
        .filter(|(key, pct)| store.set_traffic_share(key, *pct, now))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::arm_store::tests::meta;
    use crate::arena::arm_store::{CatalogMeta, TradeOutcome};
    use crate::types::{ArmKey, Regime, Variant};
    use proptest::prelude::*;

    fn store_with(variant: Variant, catalog: CatalogMeta) -> (ArmStore, ArmKey) {
        let cfg = OrchestratorConfig::default();
        let mut store = ArmStore::new();
        let key = ArmKey::new("trend_rider", variant, None, "M5");
        store.get_or_create(key.clone(), catalog, &cfg.priors, cfg.cold_start_traffic_pct, Utc::now());
        (store, key)
    }

    fn feed(store: &mut ArmStore, key: &ArmKey, hits: usize, misses: usize) {
        let now = Utc::now();
        for _ in 0..hits {
            store.apply_feedback(key, TradeOutcome { hit: 1.0, r_multiple: 1.0 }, 1e-4, now);
        }
        for _ in 0..misses {
            store.apply_feedback(key, TradeOutcome { hit: 0.0, r_multiple: -1.0 }, 1e-4, now);
        }
    }

    #[test]
    fn cold_start_arm_gets_cold_start_share() {
        let cfg = OrchestratorConfig::default();
        let (store, key) = store_with(Variant::Base, meta(&["M5"], &[Regime::Trend]));
        let arm = store.get(&key).unwrap();
        assert!((target_share_pct(arm, &cfg) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn cold_start_share_respects_explore_cap() {
        let mut cfg = OrchestratorConfig::default();
        cfg.cold_start_traffic_pct = 40.0;
        cfg.explore_cap_pct = 15.0;
        let (store, key) = store_with(Variant::Base, meta(&["M5"], &[]));
        assert!((target_share_pct(store.get(&key).unwrap(), &cfg) - 15.0).abs() < 1e-12);
    }

    #[test]
    fn warm_arm_share_follows_hit_rate() {
        let cfg = OrchestratorConfig::default();
        let (mut store, key) = store_with(Variant::Base, meta(&["M5"], &[]));
        feed(&mut store, &key, 8, 2);
        // Beta(2+8, 3+2) mean = 10/15.
        let share = target_share_pct(store.get(&key).unwrap(), &cfg);
        assert!((share - 100.0 * 10.0 / 15.0).abs() < 1e-9);
    }

    #[test]
    fn warm_arm_never_below_floor() {
        let cfg = OrchestratorConfig::default();
        let (mut store, key) = store_with(Variant::Base, meta(&["M5"], &[]));
        feed(&mut store, &key, 0, 200);
        let share = target_share_pct(store.get(&key).unwrap(), &cfg);
        assert!((share - cfg.explore_floor_pct).abs() < 1e-12);
    }

    #[test]
    fn variant_and_catalog_caps_apply() {
        let cfg = OrchestratorConfig::default();
        let (mut store, key) = store_with(Variant::Aggressive, meta(&["M5"], &[]));
        feed(&mut store, &key, 50, 0);
        assert!((target_share_pct(store.get(&key).unwrap(), &cfg) - 30.0).abs() < 1e-12);

        let mut capped = meta(&["M5"], &[]);
        capped.traffic_cap_pct = 12.0;
        let (mut store, key) = store_with(Variant::Base, capped);
        feed(&mut store, &key, 50, 0);
        assert!((target_share_pct(store.get(&key).unwrap(), &cfg) - 12.0).abs() < 1e-12);
    }

    #[test]
    fn reallocate_counts_changes() {
        let cfg = OrchestratorConfig::default();
        let (mut store, key) = store_with(Variant::Base, meta(&["M5"], &[]));
        assert_eq!(reallocate(&mut store, &cfg, Utc::now()), 0);
        feed(&mut store, &key, 10, 0);
        assert_eq!(reallocate(&mut store, &cfg, Utc::now()), 1);
        assert_eq!(reallocate(&mut store, &cfg, Utc::now()), 0);
    }

    proptest! {
        #[test]
        fn share_always_within_bounds(
            hits in 0usize..60,
            misses in 0usize..60,
            cap in -50.0f64..250.0,
            cold in -50.0f64..250.0,
        ) {
            let mut cfg = OrchestratorConfig::default();
            cfg.cold_start_traffic_pct = cold;
            let mut catalog = meta(&["M5"], &[]);
            catalog.traffic_cap_pct = cap;
            let (mut store, key) = store_with(Variant::Base, catalog);
            feed(&mut store, &key, hits, misses);
            let share = target_share_pct(store.get(&key).unwrap(), &cfg);
            prop_assert!((0.0..=100.0).contains(&share));
        }
    }
}
