// =============================================================================
// Runtime Configuration — Orchestrator knobs with atomic save
// =============================================================================
//
// Every tunable parameter of the arm orchestrator lives here. All fields carry
// `#[serde(default)]` so that adding new knobs never breaks loading an older
// config file. Persistence uses the tmp + rename pattern.
// =============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::Variant;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_explore_floor_pct() -> f64 {
    5.0
}

fn default_explore_cap_pct() -> f64 {
    20.0
}

fn default_cold_start_traffic_pct() -> f64 {
    10.0
}

fn default_min_samples_to_exploit() -> u64 {
    30
}

fn default_ucb_z() -> f64 {
    1.0
}

fn default_regime_adjustment() -> f64 {
    0.05
}

fn default_incident_cooldowns_min() -> BTreeMap<String, i64> {
    let mut m = BTreeMap::new();
    m.insert("series_loss".to_string(), 30);
    m.insert("drawdown_breach".to_string(), 60);
    m.insert("execution_anomaly".to_string(), 15);
    m
}

fn default_incident_cooldown_min() -> i64 {
    15
}

/// Longest cooldown an incident can impose (30 days).
pub const MAX_INCIDENT_COOLDOWN_MIN: i64 = 30 * 24 * 60;

fn default_max_arm_traffic_pct() -> f64 {
    100.0
}

fn default_rng_seed() -> u64 {
    42
}

fn default_metrics_flush_secs() -> u64 {
    60
}

fn default_min_confirm() -> u32 {
    1
}

fn default_slowdown_allocation_factor() -> f64 {
    0.5
}

fn default_decision_cache_size() -> usize {
    1024
}

fn default_processed_ids_capacity() -> usize {
    16_384
}

// =============================================================================
// Priors
// =============================================================================

/// Starting posterior parameters for every newly created arm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Priors {
    #[serde(default = "Priors::default_alpha")]
    pub alpha: f64,
    #[serde(default = "Priors::default_beta")]
    pub beta: f64,
    #[serde(default)]
    pub mu: f64,
    #[serde(default = "Priors::default_sigma")]
    pub sigma: f64,
    /// Floor applied to the R-multiple variance after every update.
    #[serde(default = "Priors::default_min_variance")]
    pub min_variance: f64,
}

impl Priors {
    fn default_alpha() -> f64 {
        2.0
    }

    fn default_beta() -> f64 {
        3.0
    }

    fn default_sigma() -> f64 {
        1.0
    }

    fn default_min_variance() -> f64 {
        1e-4
    }
}

impl Default for Priors {
    fn default() -> Self {
        Self {
            alpha: Self::default_alpha(),
            beta: Self::default_beta(),
            mu: 0.0,
            sigma: Self::default_sigma(),
            min_variance: Self::default_min_variance(),
        }
    }
}

// =============================================================================
// Variant caps
// =============================================================================

/// Traffic ceiling per risk variant, in percent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantCaps {
    #[serde(default = "VariantCaps::full")]
    pub base: f64,
    #[serde(default = "VariantCaps::aggressive_default")]
    pub aggressive: f64,
    #[serde(default = "VariantCaps::full")]
    pub conservative: f64,
}

impl VariantCaps {
    fn full() -> f64 {
        100.0
    }

    fn aggressive_default() -> f64 {
        30.0
    }

    pub fn cap_for(&self, variant: Variant) -> f64 {
        match variant {
            Variant::Base => self.base,
            Variant::Aggressive => self.aggressive,
            Variant::Conservative => self.conservative,
        }
    }
}

impl Default for VariantCaps {
    fn default() -> Self {
        Self {
            base: Self::full(),
            aggressive: Self::aggressive_default(),
            conservative: Self::full(),
        }
    }
}

// =============================================================================
// Safe fallback
// =============================================================================

/// The fixed arm handed out when no catalog arm is eligible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafeFallbackConfig {
    #[serde(default = "SafeFallbackConfig::default_strategy")]
    pub strategy: String,
    #[serde(default = "SafeFallbackConfig::default_variant")]
    pub variant: Variant,
    #[serde(default)]
    pub formation_tag: Option<String>,
    #[serde(default = "SafeFallbackConfig::default_allocation_pct")]
    pub allocation_pct: f64,
    #[serde(default = "SafeFallbackConfig::default_min_confirm")]
    pub min_confirm: u32,
}

impl SafeFallbackConfig {
    fn default_strategy() -> String {
        "safe_fallback".to_string()
    }

    fn default_variant() -> Variant {
        Variant::Conservative
    }

    fn default_allocation_pct() -> f64 {
        50.0
    }

    fn default_min_confirm() -> u32 {
        2
    }
}

impl Default for SafeFallbackConfig {
    fn default() -> Self {
        Self {
            strategy: Self::default_strategy(),
            variant: Self::default_variant(),
            formation_tag: None,
            allocation_pct: Self::default_allocation_pct(),
            min_confirm: Self::default_min_confirm(),
        }
    }
}

// =============================================================================
// OrchestratorConfig
// =============================================================================

/// Top-level runtime configuration.
///
/// Every field has a serde default so that older JSON files missing new fields
/// still deserialise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    // --- Traffic allocation -------------------------------------------------

    /// Minimum traffic share a warm arm keeps regardless of its hit rate.
    #[serde(default = "default_explore_floor_pct")]
    pub explore_floor_pct: f64,

    /// Maximum traffic share handed to an arm still in cold start.
    #[serde(default = "default_explore_cap_pct")]
    pub explore_cap_pct: f64,

    /// Traffic share assigned to freshly created arms.
    #[serde(default = "default_cold_start_traffic_pct")]
    pub cold_start_traffic_pct: f64,

    /// Global per-arm traffic ceiling, applied on top of the catalog cap.
    #[serde(default = "default_max_arm_traffic_pct")]
    pub max_arm_traffic_pct: f64,

    #[serde(default)]
    pub variant_caps_pct: VariantCaps,

    // --- Scoring ------------------------------------------------------------

    /// Below this many samples a selected arm is labeled `explore`.
    #[serde(default = "default_min_samples_to_exploit")]
    pub min_samples_to_exploit: u64,

    /// UCB confidence multiplier.
    #[serde(default = "default_ucb_z")]
    pub ucb_z: f64,

    #[serde(default = "default_regime_adjustment")]
    pub regime_match_bonus: f64,

    #[serde(default = "default_regime_adjustment")]
    pub regime_mismatch_penalty: f64,

    #[serde(default = "default_regime_adjustment")]
    pub high_vol_penalty: f64,

    #[serde(default)]
    pub priors: Priors,

    /// Global seed mixed into every per-request RNG.
    #[serde(default = "default_rng_seed")]
    pub rng_seed: u64,

    // --- Safety -------------------------------------------------------------

    /// No arm may trade in an illiquid regime when set.
    #[serde(default = "default_true")]
    pub illiquid_blocks: bool,

    /// Exclude aggressive arms whenever the guard is in any non-normal mode.
    #[serde(default)]
    pub block_aggressive_when_guard_non_normal: bool,

    /// Cooldown per incident type, in minutes.
    #[serde(default = "default_incident_cooldowns_min")]
    pub incident_cooldowns_min: BTreeMap<String, i64>,

    /// Cooldown for incident types missing from `incident_cooldowns_min`.
    #[serde(default = "default_incident_cooldown_min")]
    pub default_incident_cooldown_min: i64,

    /// Allocation multiplier applied under `slowdown` / `degraded` guards.
    #[serde(default = "default_slowdown_allocation_factor")]
    pub slowdown_allocation_factor: f64,

    // --- Decisions ----------------------------------------------------------

    #[serde(default = "default_min_confirm")]
    pub default_min_confirm: u32,

    #[serde(default)]
    pub safe_fallback: SafeFallbackConfig,

    /// Emitted decisions retained for idempotent replay.
    #[serde(default = "default_decision_cache_size")]
    pub decision_cache_size: usize,

    /// Request ids remembered as already processed.
    #[serde(default = "default_processed_ids_capacity")]
    pub processed_ids_capacity: usize,

    /// Feedback ids remembered for exactly-once ingestion.
    #[serde(default = "default_processed_ids_capacity")]
    pub feedback_dedup_capacity: usize,

    // --- Observability ------------------------------------------------------

    #[serde(default = "default_metrics_flush_secs")]
    pub metrics_flush_secs: u64,

    #[serde(default = "default_true")]
    pub broadcast_state_on_feedback: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            explore_floor_pct: default_explore_floor_pct(),
            explore_cap_pct: default_explore_cap_pct(),
            cold_start_traffic_pct: default_cold_start_traffic_pct(),
            max_arm_traffic_pct: default_max_arm_traffic_pct(),
            variant_caps_pct: VariantCaps::default(),
            min_samples_to_exploit: default_min_samples_to_exploit(),
            ucb_z: default_ucb_z(),
            regime_match_bonus: default_regime_adjustment(),
            regime_mismatch_penalty: default_regime_adjustment(),
            high_vol_penalty: default_regime_adjustment(),
            priors: Priors::default(),
            rng_seed: default_rng_seed(),
            illiquid_blocks: true,
            block_aggressive_when_guard_non_normal: false,
            incident_cooldowns_min: default_incident_cooldowns_min(),
            default_incident_cooldown_min: default_incident_cooldown_min(),
            slowdown_allocation_factor: default_slowdown_allocation_factor(),
            default_min_confirm: default_min_confirm(),
            safe_fallback: SafeFallbackConfig::default(),
            decision_cache_size: default_decision_cache_size(),
            processed_ids_capacity: default_processed_ids_capacity(),
            feedback_dedup_capacity: default_processed_ids_capacity(),
            metrics_flush_secs: default_metrics_flush_secs(),
            broadcast_state_on_feedback: true,
        }
    }
}

impl OrchestratorConfig {
    /// Cooldown for an incident type, falling back to the default duration.
    pub fn cooldown_for(&self, incident_type: &str) -> chrono::Duration {
        let minutes = self
            .incident_cooldowns_min
            .get(incident_type)
            .copied()
            .unwrap_or(self.default_incident_cooldown_min)
            .clamp(0, MAX_INCIDENT_COOLDOWN_MIN);
        chrono::Duration::minutes(minutes)
    }

    /// Load configuration from a JSON file at `path`.
    ///
    /// A missing file is an error so the caller can fall back to defaults
    /// with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read orchestrator config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse orchestrator config from {}", path.display()))?;

        info!(
            path = %path.display(),
            min_samples_to_exploit = config.min_samples_to_exploit,
            rng_seed = config.rng_seed,
            "orchestrator config loaded"
        );

        Ok(config)
    }

    /// Persist the configuration to `path` using write-to-tmp then rename.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise orchestrator config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "orchestrator config saved (atomic)");
        Ok(())
    }
}
