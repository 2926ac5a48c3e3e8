// ============================================================
// Layer 5 — Sequence Classifier
// ============================================================
// Encoder → first-position hidden state → tanh(Linear) pooling
// → dropout → Linear to class logits.
//
// The forward pass is split in two so the loss engine can mix
// pooled representations between the halves:
//
//   pooled(tokens, mixup)   → [B, D]   (may mix at any MixPoint)
//   classify_pooled(pooled) → [B, C]
//
// forward() is the composition without mixing.

use burn::{
    nn::{Dropout, DropoutConfig, Linear, LinearConfig},
    prelude::*,
};

use crate::data::batcher::TokenBatch;
use crate::domain::error::{Result, UdaError};
use crate::ml::{
    config::ModelConfig,
    encoder::Encoder,
    mixup::{MixPoint, MixupPlan},
};

#[derive(Module, Debug)]
pub struct Classifier<B: Backend> {
    pub encoder:     Encoder<B>,
    pub pooler:      Linear<B>,
    pub dropout:     Dropout,
    pub output:      Linear<B>,
    pub max_len:     usize,
    pub num_classes: usize,
}

impl<B: Backend> Classifier<B> {
    pub fn new(cfg: &ModelConfig, num_classes: usize, device: &B::Device) -> Self {
        Self {
            encoder:     Encoder::new(cfg, device),
            pooler:      LinearConfig::new(cfg.dim, cfg.dim).init(device),
            dropout:     DropoutConfig::new(cfg.p_drop_hidden).init(),
            output:      LinearConfig::new(cfg.dim, num_classes).init(device),
            max_len:     cfg.max_len,
            num_classes,
        }
    }

    pub fn n_layers(&self) -> usize {
        self.encoder.n_layers()
    }

    /// Reject empty batches, batches longer than the positional table,
    /// and clone ids that do not line up with the input.
    pub fn check_input(&self, tokens: &TokenBatch<B>, mixup: Option<&MixupPlan<B>>) -> Result<()> {
        if tokens.seq_len() == 0 || tokens.seq_len() > self.max_len {
            return Err(UdaError::shape(
                "classifier input (1 <= seq_len <= max_len)",
                &[self.max_len],
                &[tokens.seq_len()],
            ));
        }
        if let Some(clone_ids) = mixup.and_then(|p| p.clone_ids.as_ref()) {
            let expected = tokens.input_ids().dims();
            if clone_ids.dims() != expected {
                return Err(UdaError::shape("mixup clone ids", &expected, &clone_ids.dims()));
            }
        }
        Ok(())
    }

    /// tanh-pooled first-position representation, [B, D]
    pub fn pooled(&self, tokens: &TokenBatch<B>, mixup: Option<&MixupPlan<B>>) -> Tensor<B, 2> {
        let h = self.encoder.forward(tokens, mixup);
        let [batch_size, _, dim] = h.dims();

        let first  = h.narrow(1, 0, 1).reshape([batch_size, dim]);
        let pooled = self.pooler.forward(first).tanh();

        match mixup {
            Some(plan) if plan.point == MixPoint::Pooled => plan.mix_self(pooled),
            _ => pooled,
        }
    }

    /// [B, D] → logits [B, C]
    pub fn classify_pooled(&self, pooled: Tensor<B, 2>) -> Tensor<B, 2> {
        self.output.forward(self.dropout.forward(pooled))
    }

    pub fn forward(&self, tokens: &TokenBatch<B>) -> Tensor<B, 2> {
        self.classify_pooled(self.pooled(tokens, None))
    }

    pub fn forward_mixed(&self, tokens: &TokenBatch<B>, plan: &MixupPlan<B>) -> Tensor<B, 2> {
        self.classify_pooled(self.pooled(tokens, Some(plan)))
    }
}
