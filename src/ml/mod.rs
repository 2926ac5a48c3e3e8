// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All tensor code lives here: the encoder, the classifier head,
// the consistency losses and the training loop.
//
//   config.rs     — encoder / classifier shapes (burn Config)
//   encoder.rs    — embeddings + post-norm self-attention blocks,
//                   with hooks for mixing at any layer
//   classifier.rs — pooler + output head over the encoder
//   mixup.rs      — Beta-drawn mixing, mix points and plans
//   rng.rs        — seeded and scripted MixupRng
//   schedule.rs   — TSA thresholds, ramp-up, interleave
//   loss.rs       — per-example CE / KL / MSE, masks, sharpening
//   strategy.rs   — the LossEngine (Uda, UdaMixup, MixMatch,
//                   SupMixup)
//   ema.rs        — EMA teacher and weight decay
//   evaluator.rs  — accuracy on labeled batches
//   trainer.rs    — the step loop with Adam and checkpoints
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Devlin et al. (2019) BERT
//            Xie et al. (2019) UDA, Berthelot et al. (2019) MixMatch

pub mod config;

/// Transformer encoder with in-forward mixup hooks
pub mod encoder;

/// Sequence classifier over the encoder
pub mod classifier;

pub mod mixup;

pub mod rng;

/// Training-signal annealing, ramp-up and interleave
pub mod schedule;

/// Loss building blocks
pub mod loss;

/// Strategy dispatch and the per-step loss computation
pub mod strategy;

pub mod ema;

pub mod evaluator;

/// Step-based training loop with evaluation and checkpointing
pub mod trainer;

#[cfg(test)]
pub(crate) mod testing;
