// Shared fixtures for the ml unit tests: a tiny classifier and
// deterministic token batches.

use burn::prelude::*;

use crate::data::batcher::{LabeledBatch, TokenBatch, UnlabeledBatch};
use crate::ml::{
    classifier::Classifier,
    config::{ClassifierConfig, ModelConfig},
};

pub const VOCAB: usize = 40;
pub const DIM: usize = 8;

pub fn tiny_config(num_classes: usize) -> ClassifierConfig {
    let model = ModelConfig::new(VOCAB)
        .with_dim(DIM)
        .with_n_layers(2)
        .with_n_heads(2)
        .with_dim_ff(16)
        .with_max_len(16);
    ClassifierConfig::new(model, num_classes)
}

pub fn tiny_classifier<B: Backend>(num_classes: usize, device: &B::Device) -> Classifier<B> {
    tiny_config(num_classes).init(device)
}

/// `rows` sequences of length `seq_len`; `offset` varies the token ids.
pub fn token_batch<B: Backend>(rows: usize, seq_len: usize, offset: usize, device: &B::Device) -> TokenBatch<B> {
    let ids: Vec<i32> = (0..rows * seq_len)
        .map(|i| ((i * 7 + offset) % (VOCAB - 1)) as i32 + 1)
        .collect();
    TokenBatch::new(
        Tensor::<B, 1, Int>::from_ints(ids.as_slice(), device).reshape([rows, seq_len]),
        Tensor::<B, 2, Int>::zeros([rows, seq_len], device),
        Tensor::<B, 2, Int>::ones([rows, seq_len], device),
    )
    .unwrap()
}

pub fn labeled_batch<B: Backend>(labels: &[i32], seq_len: usize, device: &B::Device) -> LabeledBatch<B> {
    LabeledBatch::new(
        token_batch(labels.len(), seq_len, 0, device),
        Tensor::<B, 1, Int>::from_ints(labels, device),
    )
    .unwrap()
}

pub fn unlabeled_batch<B: Backend>(rows: usize, seq_len: usize, device: &B::Device) -> UnlabeledBatch<B> {
    UnlabeledBatch::new(
        token_batch(rows, seq_len, 3, device),
        token_batch(rows, seq_len, 11, device),
    )
    .unwrap()
}

pub fn scalar<B: Backend>(t: Tensor<B, 1>) -> f64 {
    t.into_scalar().elem::<f64>()
}
