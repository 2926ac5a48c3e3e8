// ============================================================
// Layer 5 — Loss Building Blocks
// ============================================================
// Per-example losses, masks and reductions shared by every
// training strategy in strategy.rs.
//
//   cross_entropy_per_example       — hard labels
//   soft_cross_entropy_per_example  — soft (mixed) targets
//   masked_mean                     — Σ(v·m) / max(Σm, 1)
//   tsa_mask                        — drop over-confident labeled rows
//   confidence_mask                 — keep confident unlabeled rows
//   sharpen                         — p^(1/T), renormalised
//   UnsupCriterion                  — KL or squared error consistency
//
// Masks are plain 0/1 float tensors and never carry gradients.

use std::str::FromStr;

use burn::{
    prelude::*,
    tensor::activation::{log_softmax, softmax},
};
use serde::{Deserialize, Serialize};

use crate::domain::error::{Result, UdaError};

/// Floor applied to target probabilities before taking their log,
/// so zero-probability classes contribute exactly 0 to the KL sum.
const TARGET_FLOOR: f64 = 1e-20;

/// −log softmax(logits)[label], one value per row
pub fn cross_entropy_per_example<B: Backend>(logits: Tensor<B, 2>, labels: Tensor<B, 1, Int>) -> Tensor<B, 1> {
    let [batch_size, _] = logits.dims();
    log_softmax(logits, 1)
        .gather(1, labels.reshape([batch_size, 1]))
        .reshape([batch_size])
        .neg()
}

/// −Σ_c target_c · log softmax(logits)_c, one value per row
pub fn soft_cross_entropy_per_example<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    let [batch_size, _] = logits.dims();
    (log_softmax(logits, 1) * targets)
        .sum_dim(1)
        .reshape([batch_size])
        .neg()
}

pub fn one_hot<B: Backend>(labels: Tensor<B, 1, Int>, num_classes: usize) -> Tensor<B, 2> {
    let [batch_size] = labels.dims();
    let device = labels.device();
    Tensor::<B, 2>::zeros([batch_size, num_classes], &device).scatter(
        1,
        labels.reshape([batch_size, 1]),
        Tensor::ones([batch_size, 1], &device),
    )
}

/// Σ(values · mask) / max(Σmask, 1). An all-zero mask yields 0.
pub fn masked_mean<B: Backend>(values: Tensor<B, 1>, mask: Tensor<B, 1>) -> Tensor<B, 1> {
    let denominator = mask.clone().sum().clamp_min(1.0);
    (values * mask).sum() / denominator
}

/// 1 where exp(−loss) ≤ threshold, 0 where the model is already
/// more confident than the threshold on the gold class.
pub fn tsa_mask<B: Backend>(per_example_loss: Tensor<B, 1>, threshold: f64) -> Tensor<B, 1> {
    per_example_loss
        .detach()
        .neg()
        .exp()
        .lower_equal_elem(threshold)
        .float()
}

/// 1 where max_c probs > threshold. None keeps every row.
pub fn confidence_mask<B: Backend>(probs: Tensor<B, 2>, threshold: Option<f64>) -> Tensor<B, 1> {
    let [batch_size, _] = probs.dims();
    match threshold {
        None => Tensor::ones([batch_size], &probs.device()),
        Some(t) => probs
            .detach()
            .max_dim(1)
            .reshape([batch_size])
            .greater_elem(t)
            .float(),
    }
}

/// Mean of the per-example loss, restricted to the TSA mask when a
/// threshold is active.
pub fn reduce_supervised<B: Backend>(per_example_loss: Tensor<B, 1>, tsa_threshold: Option<f64>) -> Tensor<B, 1> {
    match tsa_threshold {
        Some(t) => {
            let mask = tsa_mask(per_example_loss.clone(), t);
            masked_mean(per_example_loss, mask)
        }
        None => per_example_loss.mean(),
    }
}

/// p^(1/T) renormalised over classes; T → 0 approaches one-hot argmax.
pub fn sharpen<B: Backend>(probs: Tensor<B, 2>, temperature: f64) -> Tensor<B, 2> {
    let powered = probs.powf_scalar(1.0 / temperature);
    powered.clone() / powered.sum_dim(1)
}

/// Σ_c target_c · (log target_c − log_probs_c), one value per row.
pub fn kl_divergence_per_example<B: Backend>(log_probs: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    let [batch_size, _] = log_probs.dims();
    let log_targets = targets.clone().clamp_min(TARGET_FLOOR).log();
    (targets * (log_targets - log_probs))
        .sum_dim(1)
        .reshape([batch_size])
}

// ─── Consistency criterion ────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsupCriterion {
    /// KL(target ‖ softmax(student / T))
    Kl,
    /// Mean over classes of (softmax(student) − target)²
    Mse,
}

impl UnsupCriterion {
    /// Per-example divergence between student logits and a target
    /// distribution. `temperature` scales the KL student logits and
    /// is ignored by Mse.
    pub fn per_example<B: Backend>(
        self,
        student_logits: Tensor<B, 2>,
        targets:        Tensor<B, 2>,
        temperature:    f64,
    ) -> Tensor<B, 1> {
        match self {
            UnsupCriterion::Kl => {
                let log_probs = log_softmax(student_logits.div_scalar(temperature), 1);
                kl_divergence_per_example(log_probs, targets)
            }
            UnsupCriterion::Mse => {
                let [batch_size, _] = student_logits.dims();
                (softmax(student_logits, 1) - targets)
                    .powf_scalar(2.0)
                    .mean_dim(1)
                    .reshape([batch_size])
            }
        }
    }
}

impl FromStr for UnsupCriterion {
    type Err = UdaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "kl"                => Ok(UnsupCriterion::Kl),
            "mse" | "l2"        => Ok(UnsupCriterion::Mse),
            other => Err(UdaError::config(format!(
                "unknown consistency criterion '{other}' (expected kl or mse)"
            ))),
        }
    }
}
