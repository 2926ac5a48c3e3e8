// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The data layer implements these; the application layer only
// sees the traits.
//
//   ExampleSource<T> — anything that yields examples of type T
//                      (a TSV reader today, an in-memory fixture
//                      in tests)
//   MixupRng         — the random decisions of one loss call:
//                      Beta draws, permutations, mix layer choice

use crate::domain::error::Result;

// ─── ExampleSource ────────────────────────────────────────────────────────────
/// Any component that can produce a full list of examples.
pub trait ExampleSource<T> {
    fn load_all(&self) -> Result<Vec<T>>;
}

impl<T: Clone> ExampleSource<T> for Vec<T> {
    fn load_all(&self) -> Result<Vec<T>> {
        Ok(self.clone())
    }
}

// ─── MixupRng ─────────────────────────────────────────────────────────────────
/// Source of every random choice the loss engine makes.
///
/// Implementations:
///   - SeededMixupRng → ChaCha8 + rand_distr::Beta
///   - scripted RNGs in tests → fixed coefficients and permutations
pub trait MixupRng {
    /// Draw from Beta(alpha, alpha), before symmetrisation
    fn beta(&mut self, alpha: f64) -> f64;

    /// A uniformly random permutation of 0..n
    fn permutation(&mut self, n: usize) -> Vec<usize>;

    /// A uniform integer in 0..=upper
    fn index_inclusive(&mut self, upper: usize) -> usize;
}
