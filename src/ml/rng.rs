// ============================================================
// Layer 5 — Seeded Mixup RNG
// ============================================================
// The production MixupRng: a ChaCha8 stream seeded once per run,
// so two runs with the same seed draw the same mixing coefficients,
// permutations and mix layers.

use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Beta, Distribution};

use crate::domain::traits::MixupRng;

pub struct SeededMixupRng {
    rng: ChaCha8Rng,
}

impl SeededMixupRng {
    pub fn new(seed: u64) -> Self {
        Self { rng: ChaCha8Rng::seed_from_u64(seed) }
    }
}

impl MixupRng for SeededMixupRng {
    fn beta(&mut self, alpha: f64) -> f64 {
        // alpha > 0 is checked by LossConfig::validate; an invalid
        // alpha degrades to "no mixing" rather than a panic.
        match Beta::new(alpha, alpha) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(_)   => 1.0,
        }
    }

    fn permutation(&mut self, n: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..n).collect();
        indices.shuffle(&mut self.rng);
        indices
    }

    fn index_inclusive(&mut self, upper: usize) -> usize {
        self.rng.gen_range(0..=upper)
    }
}

/// Deterministic RNG for tests: fixed coefficients, fixed permutations.
#[cfg(test)]
pub(crate) struct ScriptedRng {
    pub lambdas:      Vec<f64>,
    pub permutations: Vec<Vec<usize>>,
    pub index:        usize,
}

#[cfg(test)]
impl ScriptedRng {
    /// Every Beta draw returns `lambda`; permutations are identity.
    pub fn constant(lambda: f64) -> Self {
        Self { lambdas: vec![lambda], permutations: Vec::new(), index: 0 }
    }

    pub fn with_permutation(lambda: f64, permutation: Vec<usize>) -> Self {
        Self { lambdas: vec![lambda], permutations: vec![permutation], index: 0 }
    }
}

#[cfg(test)]
impl MixupRng for ScriptedRng {
    fn beta(&mut self, _alpha: f64) -> f64 {
        let value = self.lambdas[0];
        if self.lambdas.len() > 1 {
            self.lambdas.remove(0);
        }
        value
    }

    fn permutation(&mut self, n: usize) -> Vec<usize> {
        match self.permutations.first() {
            Some(p) if p.len() == n => {
                let p = p.clone();
                if self.permutations.len() > 1 {
                    self.permutations.remove(0);
                }
                p
            }
            _ => (0..n).collect(),
        }
    }

    fn index_inclusive(&mut self, upper: usize) -> usize {
        self.index.min(upper)
    }
}
