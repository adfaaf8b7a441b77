// =============================================================================
// Arm State Store — One posterior record per arm key
// =============================================================================
//
// Owns every ArmState for the lifetime of the process. Arms are created
// lazily when the catalog first announces them and are never removed.
//
// Fields of ArmState are private to this module: handlers go through the
// named operations below (`apply_feedback`, `set_blocked`, `set_cooldown`,
// `set_traffic_share`) which keep alpha/beta positive and `samples`
// monotonic.
//
// Iteration order is insertion order, which is what makes tie-breaking in
// the scoring engine deterministic.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::runtime_config::Priors;
use crate::types::{ArmKey, Regime};

// =============================================================================
// Types
// =============================================================================

/// Eligibility envelope supplied by the strategy catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogMeta {
    pub timeframes: Vec<String>,
    pub fits: Vec<Regime>,
    pub risk_class: String,
    pub min_samples_to_unlock: u64,
    pub traffic_cap_pct: f64,
}

impl CatalogMeta {
    pub fn allows_timeframe(&self, timeframe: &str) -> bool {
        self.timeframes.iter().any(|tf| tf == timeframe)
    }

    pub fn fits_regime(&self, regime: Regime) -> bool {
        self.fits.contains(&regime)
    }
}

/// Beta posterior over the hit rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BetaPosterior {
    pub alpha: f64,
    pub beta: f64,
}

impl BetaPosterior {
    pub fn mean(&self) -> f64 {
        let denom = self.alpha + self.beta;
        if denom <= 0.0 {
            0.5
        } else {
            self.alpha / denom
        }
    }
}

/// Gaussian posterior over the per-trade R-multiple, maintained online.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GaussianPosterior {
    pub mu: f64,
    pub sigma: f64,
    /// Running sum of squared deviations (Welford).
    #[serde(skip)]
    m2: f64,
    #[serde(skip)]
    prior_sigma: f64,
}

/// Hard safety flags.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Safety {
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl Safety {
    pub fn cooling_down(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.map(|until| until > now).unwrap_or(false)
    }
}

/// Live state of one arm.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmState {
    key: ArmKey,
    catalog: CatalogMeta,
    hit_rate: BetaPosterior,
    r_mean: GaussianPosterior,
    samples: u64,
    traffic_share_pct: f64,
    safety: Safety,
    last_update_at: DateTime<Utc>,
}

impl ArmState {
    fn new(key: ArmKey, catalog: CatalogMeta, priors: &Priors, traffic_share_pct: f64, now: DateTime<Utc>) -> Self {
        // A misconfigured prior must never produce a non-positive posterior.
        let alpha = if priors.alpha.is_finite() && priors.alpha > 0.0 { priors.alpha } else { 1.0 };
        let beta = if priors.beta.is_finite() && priors.beta > 0.0 { priors.beta } else { 1.0 };
        let floor = priors.min_variance.max(f64::MIN_POSITIVE).sqrt();
        let sigma = if priors.sigma.is_finite() { priors.sigma.max(floor) } else { 1.0 };
        let mu = if priors.mu.is_finite() { priors.mu } else { 0.0 };

        Self {
            key,
            catalog,
            hit_rate: BetaPosterior { alpha, beta },
            r_mean: GaussianPosterior {
                mu,
                sigma,
                m2: 0.0,
                prior_sigma: sigma,
            },
            samples: 0,
            traffic_share_pct: traffic_share_pct.clamp(0.0, 100.0),
            safety: Safety::default(),
            last_update_at: now,
        }
    }

    pub fn key(&self) -> &ArmKey {
        &self.key
    }

    pub fn catalog(&self) -> &CatalogMeta {
        &self.catalog
    }

    pub fn hit_rate(&self) -> BetaPosterior {
        self.hit_rate
    }

    pub fn r_mean(&self) -> GaussianPosterior {
        self.r_mean
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn traffic_share_pct(&self) -> f64 {
        self.traffic_share_pct
    }

    pub fn safety(&self) -> Safety {
        self.safety
    }

    /// Still below the catalog threshold for leaving cold start.
    pub fn in_cold_start(&self) -> bool {
        self.samples < self.catalog.min_samples_to_unlock
    }
}

/// One trade outcome as seen by the store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeOutcome {
    /// 1.0 for a hit, 0.0 for a miss.
    pub hit: f64,
    pub r_multiple: f64,
}

// =============================================================================
// ArmStore
// =============================================================================

/// Insertion-ordered map from arm key to its state.
#[derive(Debug, Default)]
pub struct ArmStore {
    arms: Vec<ArmState>,
    index: HashMap<ArmKey, usize>,
}

impl ArmStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.arms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arms.is_empty()
    }

    pub fn get(&self, key: &ArmKey) -> Option<&ArmState> {
        self.index.get(key).map(|&i| &self.arms[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArmState> {
        self.arms.iter()
    }

    /// Return the arm for `key`, creating it with `priors` if absent.
    ///
    /// An existing arm keeps its posteriors; only the catalog envelope is
    /// refreshed. Returns the arm and whether it was created.
    pub fn get_or_create(
        &mut self,
        key: ArmKey,
        catalog: CatalogMeta,
        priors: &Priors,
        cold_start_traffic_pct: f64,
        now: DateTime<Utc>,
    ) -> (&ArmState, bool) {
        if let Some(&i) = self.index.get(&key) {
            let arm = &mut self.arms[i];
            if arm.catalog != catalog {
                arm.catalog = catalog;
                arm.last_update_at = now;
            }
            return (&self.arms[i], false);
        }

        debug!(arm = %key, "arm created");
        let i = self.arms.len();
        self.index.insert(key.clone(), i);
        self.arms
            .push(ArmState::new(key, catalog, priors, cold_start_traffic_pct, now));
        (&self.arms[i], true)
    }

    /// Apply one trade outcome. Returns `None` when the key is unknown.
    ///
    /// `alpha += hit`, `beta += 1 - hit`, `samples += 1`, and the R-multiple
    /// mean/variance advance by one Welford step with `min_variance` as floor.
    pub fn apply_feedback(
        &mut self,
        key: &ArmKey,
        outcome: TradeOutcome,
        min_variance: f64,
        now: DateTime<Utc>,
    ) -> Option<&ArmState> {
        let i = *self.index.get(key)?;
        let arm = &mut self.arms[i];

        let hit = if outcome.hit.is_finite() { outcome.hit.clamp(0.0, 1.0) } else { 0.0 };
        arm.hit_rate.alpha += hit;
        arm.hit_rate.beta += 1.0 - hit;
        arm.samples = arm.samples.saturating_add(1);

        if outcome.r_multiple.is_finite() {
            let n = arm.samples as f64;
            let post = &mut arm.r_mean;
            let delta = outcome.r_multiple - post.mu;
            post.mu += delta / n;
            post.m2 += delta * (outcome.r_multiple - post.mu);

            let variance = if arm.samples < 2 {
                post.prior_sigma * post.prior_sigma
            } else {
                post.m2 / (n - 1.0)
            };
            post.sigma = variance.max(min_variance.max(f64::MIN_POSITIVE)).sqrt();
        }

        arm.last_update_at = now;
        Some(&self.arms[i])
    }

    /// Set the policy block flag. Returns `true` when the flag changed.
    pub fn set_blocked(&mut self, key: &ArmKey, blocked: bool, now: DateTime<Utc>) -> bool {
        let Some(&i) = self.index.get(key) else {
            return false;
        };
        let arm = &mut self.arms[i];
        if arm.safety.blocked == blocked {
            return false;
        }
        arm.safety.blocked = blocked;
        arm.last_update_at = now;
        true
    }

    /// Put the arm in cooldown until `until`.
    pub fn set_cooldown(&mut self, key: &ArmKey, until: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let Some(&i) = self.index.get(key) else {
            return false;
        };
        let arm = &mut self.arms[i];
        arm.safety.cooldown_until = Some(until);
        arm.last_update_at = now;
        true
    }

    /// Replace the traffic share, clamped to [0, 100].
    pub fn set_traffic_share(&mut self, key: &ArmKey, pct: f64, now: DateTime<Utc>) -> bool {
        let Some(&i) = self.index.get(key) else {
            return false;
        };
        let arm = &mut self.arms[i];
        let pct = if pct.is_finite() { pct.clamp(0.0, 100.0) } else { 0.0 };
        if (arm.traffic_share_pct - pct).abs() < f64::EPSILON {
            return false;
        }
        arm.traffic_share_pct = pct;
        arm.last_update_at = now;
        true
    }

    /// Keys of every arm matching `pred`, in insertion order.
    pub fn keys_where(&self, pred: impl Fn(&ArmState) -> bool) -> Vec<ArmKey> {
        self.arms
            .iter()
            .filter(|a| pred(a))
            .map(|a| a.key.clone())
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
