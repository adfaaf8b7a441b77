// =============================================================================
// Sampling Primitives — Seeded Beta / Gaussian draws per decision
// =============================================================================
//
// Every selection request gets its own generator, seeded from
// (global seed, symbol, timeframe, request id). Two requests carrying the same
// inputs therefore see the same sequence of draws.
//
// The seed is the first 8 bytes of a SHA-256 digest over the inputs, so it is
// stable across platforms and process restarts.
// =============================================================================

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Beta, Distribution, Normal};
use sha2::{Digest, Sha256};

/// Unit separator between hashed fields so ("ab","c") and ("a","bc") differ.
const FIELD_SEP: u8 = 0x1f;

/// Derive the per-request seed.
pub fn decision_seed(global_seed: u64, symbol: &str, timeframe: &str, request_id: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(global_seed.to_le_bytes());
    hasher.update([FIELD_SEP]);
    hasher.update(symbol.as_bytes());
    hasher.update([FIELD_SEP]);
    hasher.update(timeframe.as_bytes());
    hasher.update([FIELD_SEP]);
    hasher.update(request_id.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Deterministic generator for one decision.
pub struct DecisionRng {
    rng: StdRng,
}

impl DecisionRng {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn for_request(global_seed: u64, symbol: &str, timeframe: &str, request_id: &str) -> Self {
        Self::from_seed(decision_seed(global_seed, symbol, timeframe, request_id))
    }

    /// Draw from Beta(alpha, beta).
    ///
    /// Non-finite or non-positive parameters fall back to 0.5.
    pub fn beta(&mut self, alpha: f64, beta: f64) -> f64 {
        if !(alpha.is_finite() && beta.is_finite()) || alpha <= 0.0 || beta <= 0.0 {
            return 0.5;
        }
        match Beta::new(alpha, beta) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(_) => alpha / (alpha + beta),
        }
    }

    /// Draw from Gaussian(mu, sigma). A zero or invalid sigma returns `mu`.
    pub fn gaussian(&mut self, mu: f64, sigma: f64) -> f64 {
        if !mu.is_finite() {
            return 0.0;
        }
        if !sigma.is_finite() || sigma <= 0.0 {
            return mu;
        }
        match Normal::new(mu, sigma) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(_) => mu,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_depends_on_every_input() {
        let base = decision_seed(42, "BTCUSDT", "M5", "req-1");
        assert_eq!(base, decision_seed(42, "BTCUSDT", "M5", "req-1"));
        assert_ne!(base, decision_seed(43, "BTCUSDT", "M5", "req-1"));
        assert_ne!(base, decision_seed(42, "ETHUSDT", "M5", "req-1"));
        assert_ne!(base, decision_seed(42, "BTCUSDT", "H1", "req-1"));
        assert_ne!(base, decision_seed(42, "BTCUSDT", "M5", "req-2"));
    }

    #[test]
    fn field_separator_prevents_concatenation_collisions() {
        assert_ne!(
            decision_seed(1, "AB", "C", "r"),
            decision_seed(1, "A", "BC", "r")
        );
    }

    #[test]
    fn same_seed_same_draws() {
        let mut a = DecisionRng::for_request(42, "BTCUSDT", "M5", "req-1");
        let mut b = DecisionRng::for_request(42, "BTCUSDT", "M5", "req-1");
        for _ in 0..20 {
            assert_eq!(a.beta(2.0, 3.0).to_bits(), b.beta(2.0, 3.0).to_bits());
            assert_eq!(a.gaussian(0.5, 1.0).to_bits(), b.gaussian(0.5, 1.0).to_bits());
        }
    }

    #[test]
    fn beta_draws_stay_in_unit_interval() {
        let mut rng = DecisionRng::from_seed(7);
        for _ in 0..500 {
            let x = rng.beta(0.5, 0.5);
            assert!((0.0..=1.0).contains(&x));
        }
    }

    #[test]
    fn beta_sample_mean_tracks_posterior_mean() {
        let mut rng = DecisionRng::from_seed(11);
        let n = 4000;
        let mean = (0..n).map(|_| rng.beta(8.0, 2.0)).sum::<f64>() / n as f64;
        assert!((mean - 0.8).abs() < 0.02, "mean={mean}");
    }

    #[test]
    fn gaussian_sample_mean_tracks_mu() {
        let mut rng = DecisionRng::from_seed(13);
        let n = 4000;
        let mean = (0..n).map(|_| rng.gaussian(1.5, 0.5)).sum::<f64>() / n as f64;
        assert!((mean - 1.5).abs() < 0.05, "mean={mean}");
    }

    #[test]
    fn degenerate_parameters_fall_back() {
        let mut rng = DecisionRng::from_seed(1);
        assert_eq!(rng.beta(0.0, 1.0), 0.5);
        assert_eq!(rng.beta(f64::NAN, 1.0), 0.5);
        assert_eq!(rng.gaussian(0.7, 0.0), 0.7);
        assert_eq!(rng.gaussian(0.7, -1.0), 0.7);
    }
}
