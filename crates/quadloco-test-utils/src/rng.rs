//! Deterministic RNG utilities for reproducible tests.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Create a deterministic `ChaCha8Rng` from a seed.
///
/// All test randomization should go through this to ensure reproducibility.
pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Draw `n` samples uniformly from `[lo, hi)` with a fresh seeded RNG.
pub fn uniform_samples(n: usize, lo: f64, hi: f64, seed: u64) -> Vec<f64> {
    let mut rng = seeded_rng(seed);
    (0..n).map(|_| rng.gen_range(lo..hi)).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
