// ============================================================
// Layer 5 — Mixup Primitives
// ============================================================
// Convex combinations of a tensor with a row-permuted copy:
//
//   mix(x) = λ · x + (1 − λ) · x[perm]
//
// λ comes from Beta(α, α) and is symmetrised to max(λ, 1 − λ) so
// the un-permuted row always dominates.
//
// Where the mix happens inside the classifier is a MixPoint:
//
//   layer 0        → Embedding   (token embeddings)
//   layer 1..=L    → Block(k)    (output of encoder block k)
//   layer L + 1    → Pooled      (tanh-pooled [CLS] vector)
//
// A MixupMode ("word", "word_cls", "cls", "word_cls_only") plus
// the manifold flag decides which layer is drawn.

use std::str::FromStr;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{
    error::{Result, UdaError},
    traits::MixupRng,
};

/// max(λ, 1 − λ)
pub fn symmetrize(lambda: f64) -> f64 {
    lambda.max(1.0 - lambda)
}

pub fn permutation_tensor<B: Backend>(permutation: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let ints: Vec<i32> = permutation.iter().map(|&i| i as i32).collect();
    Tensor::<B, 1, Int>::from_ints(ints.as_slice(), device)
}

/// λ · a + (1 − λ) · b[perm]
pub fn mix_with<B: Backend, const D: usize>(
    a:           Tensor<B, D>,
    b:           Tensor<B, D>,
    lambda:      f64,
    permutation: Tensor<B, 1, Int>,
) -> Tensor<B, D> {
    a.mul_scalar(lambda) + b.select(0, permutation).mul_scalar(1.0 - lambda)
}

// ─── MixDraw ──────────────────────────────────────────────────────────────────
/// One sampled (λ, permutation) pair, applied to every tensor that
/// has to be mixed consistently (hidden states and their targets).
#[derive(Debug, Clone)]
pub struct MixDraw<B: Backend> {
    pub lambda:      f64,
    pub permutation: Tensor<B, 1, Int>,
}

impl<B: Backend> MixDraw<B> {
    /// Symmetrised Beta(α, α) coefficient and a fresh permutation of the batch
    pub fn sample(rng: &mut dyn MixupRng, alpha: f64, batch_size: usize, device: &B::Device) -> Self {
        let lambda      = symmetrize(rng.beta(alpha));
        let permutation = permutation_tensor(&rng.permutation(batch_size), device);
        Self { lambda, permutation }
    }

    /// λ = 1 with the identity permutation; `mix` returns its input.
    pub fn identity(batch_size: usize, device: &B::Device) -> Self {
        let permutation = Tensor::<B, 1, Int>::arange(0..batch_size as i64, device);
        Self { lambda: 1.0, permutation }
    }

    pub fn mix<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        if self.lambda >= 1.0 {
            return x;
        }
        mix_with(x.clone(), x, self.lambda, self.permutation.clone())
    }
}

// ─── MixPoint ─────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixPoint {
    Embedding,
    /// After encoder block k (1-based)
    Block(usize),
    Pooled,
}

impl MixPoint {
    /// 0 → Embedding, 1..=n_layers → Block, n_layers + 1 → Pooled
    pub fn from_layer(layer: usize, n_layers: usize) -> Self {
        match layer {
            0                  => MixPoint::Embedding,
            k if k <= n_layers => MixPoint::Block(k),
            _                  => MixPoint::Pooled,
        }
    }
}

// ─── MixupMode ────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixupMode {
    /// Token embeddings, or any block output under manifold mixup
    Word,
    /// Like Word, but manifold mixup may also pick the pooled vector
    WordCls,
    /// Always the pooled vector
    Cls,
    /// Embedding or pooled vector, chosen uniformly
    WordClsOnly,
}

impl MixupMode {
    pub fn resolve(self, manifold: bool, n_layers: usize, rng: &mut dyn MixupRng) -> MixPoint {
        let pooled = n_layers + 1;
        let layer = match self {
            MixupMode::Word if manifold    => rng.index_inclusive(n_layers),
            MixupMode::WordCls if manifold => rng.index_inclusive(pooled),
            MixupMode::Word | MixupMode::WordCls => 0,
            MixupMode::Cls                 => pooled,
            MixupMode::WordClsOnly         => {
                if rng.index_inclusive(1) == 0 { 0 } else { pooled }
            }
        };
        MixPoint::from_layer(layer, n_layers)
    }
}

impl FromStr for MixupMode {
    type Err = UdaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "word"          => Ok(MixupMode::Word),
            "word_cls"      => Ok(MixupMode::WordCls),
            "cls"           => Ok(MixupMode::Cls),
            "word_cls_only" => Ok(MixupMode::WordClsOnly),
            other => Err(UdaError::config(format!(
                "unknown mixup mode '{other}' (expected word, word_cls, cls or word_cls_only)"
            ))),
        }
    }
}

// ─── MixupPlan ────────────────────────────────────────────────────────────────
/// Everything the classifier needs to perform one in-forward mixup.
///
/// `clone_ids` is an alternative token-id batch whose representation
/// is mixed in place of the permuted original rows; it must have the
/// same shape as the input ids. `None` mixes the batch with itself.
#[derive(Debug, Clone)]
pub struct MixupPlan<B: Backend> {
    pub point:        MixPoint,
    pub lambda:       f64,
    pub permutation:  Tensor<B, 1, Int>,
    pub clone_ids:    Option<Tensor<B, 2, Int>>,
    /// Stop gradients through the clone path
    pub detach_clone: bool,
}

impl<B: Backend> MixupPlan<B> {
    pub fn new(point: MixPoint, draw: &MixDraw<B>) -> Self {
        Self {
            point,
            lambda:       draw.lambda,
            permutation:  draw.permutation.clone(),
            clone_ids:    None,
            detach_clone: false,
        }
    }

    pub fn with_clone_ids(mut self, clone_ids: Tensor<B, 2, Int>, detach_clone: bool) -> Self {
        self.clone_ids    = Some(clone_ids);
        self.detach_clone = detach_clone;
        self
    }

    pub fn is_block(&self, k: usize) -> bool {
        self.point == MixPoint::Block(k)
    }

    /// Mix `x` with the permuted rows of `partner`
    pub fn mix_pair<const D: usize>(&self, x: Tensor<B, D>, partner: Tensor<B, D>) -> Tensor<B, D> {
        let partner = if self.detach_clone { partner.detach() } else { partner };
        mix_with(x, partner, self.lambda, self.permutation.clone())
    }

    pub fn mix_self<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        mix_with(x.clone(), x, self.lambda, self.permutation.clone())
    }
}
