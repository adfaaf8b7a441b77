// =============================================================================
// Arena Module — Multi-armed bandit over strategy arms
// =============================================================================
//
// Each arm (strategy, variant, formation tag, timeframe) keeps a Beta
// posterior over its hit rate and a Gaussian posterior over its R-multiple.
// Selection draws from both (Thompson sampling), blends in an upper
// confidence bound and adjusts for regime fit.
//
//   sampling    per-request deterministic RNG, Beta / Gaussian draws
//   arm_store   the one owned table of ArmState
//   allocation  traffic share ceilings
//   scoring     hybrid score and winner selection
// =============================================================================

pub mod allocation;
pub mod arm_store;
pub mod sampling;
pub mod scoring;
