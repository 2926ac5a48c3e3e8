// ============================================================
// Layer 5 — Evaluator
// ============================================================
// Classification accuracy of a model on labeled batches.
//
// Call with an inference-mode model (`model.valid()` from the
// training loop, or a model rebuilt on the inner backend) so
// dropout is disabled.

use burn::{
    data::dataloader::DataLoader,
    prelude::*,
};

use crate::data::batcher::LabeledBatch;
use crate::ml::classifier::Classifier;

/// Per-example correctness (1.0 / 0.0, shape [B]) and its mean
#[derive(Debug, Clone)]
pub struct BatchAccuracy<B: Backend> {
    pub correct:  Tensor<B, 1>,
    pub accuracy: f64,
}

pub fn evaluate_batch<B: Backend>(model: &Classifier<B>, batch: &LabeledBatch<B>) -> BatchAccuracy<B> {
    let logits     = model.forward(batch.tokens());
    let batch_size = batch.batch_size();

    // argmax(1) keeps the class axis: [B, 1] → [B]
    let predicted = logits.argmax(1).reshape([batch_size]);
    let correct   = predicted.equal(batch.labels().clone()).float();
    let accuracy  = correct.clone().mean().into_scalar().elem::<f64>();

    BatchAccuracy { correct, accuracy }
}

/// Correct / total over every batch of the loader; 0.0 when it is empty.
pub fn evaluate_dataset<B: Backend>(
    model:  &Classifier<B>,
    loader: &dyn DataLoader<LabeledBatch<B>>,
) -> f64 {
    let mut correct = 0.0f64;
    let mut total   = 0usize;

    for batch in loader.iter() {
        let result = evaluate_batch(model, &batch);
        correct += result.correct.sum().into_scalar().elem::<f64>();
        total   += batch.batch_size();
    }

    if total > 0 { correct / total as f64 } else { 0.0 }
}
