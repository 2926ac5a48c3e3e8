// ============================================================
// Layer 5 — Model Configuration
// ============================================================
// Static description of the encoder and classifier shapes.
// Loaded once (from CLI flags or a JSON file) and passed into
// every constructor; nothing reads ambient state.
//
// NOTE: #[derive(Config)] already generates Clone and
// Serialize/Deserialize, plus `save` / `load` for JSON files.

use burn::prelude::*;

use crate::domain::{error::UdaError, example::TokenSequence};
use crate::ml::classifier::Classifier;

#[derive(Config, Debug)]
pub struct ModelConfig {
    pub vocab_size: usize,
    /// Hidden dimension of every block
    #[config(default = 768)]
    pub dim: usize,
    #[config(default = 12)]
    pub n_layers: usize,
    #[config(default = 12)]
    pub n_heads: usize,
    /// Inner width of the position-wise feed-forward network
    #[config(default = 3072)]
    pub dim_ff: usize,
    #[config(default = 0.1)]
    pub p_drop_hidden: f64,
    #[config(default = 0.1)]
    pub p_drop_attn: f64,
    /// Size of the positional embedding table
    #[config(default = 512)]
    pub max_len: usize,
    #[config(default = 2)]
    pub n_segments: usize,
}

impl ModelConfig {
    /// Width of one attention head (dim / n_heads)
    pub fn head_width(&self) -> usize {
        self.dim / self.n_heads.max(1)
    }

    pub fn validate(&self) -> crate::domain::error::Result<()> {
        if self.vocab_size == 0 || self.dim == 0 || self.n_heads == 0 || self.dim_ff == 0 {
            return Err(UdaError::config(
                "vocab_size, dim, n_heads and dim_ff must all be positive",
            ));
        }
        if self.dim % self.n_heads != 0 {
            return Err(UdaError::config(format!(
                "dim ({}) must be divisible by n_heads ({})",
                self.dim, self.n_heads
            )));
        }
        for (name, p) in [("p_drop_hidden", self.p_drop_hidden), ("p_drop_attn", self.p_drop_attn)] {
            if !(0.0..1.0).contains(&p) {
                return Err(UdaError::config(format!("{name} must be in [0, 1), got {p}")));
            }
        }
        if self.max_len == 0 || self.n_segments == 0 {
            return Err(UdaError::config("max_len and n_segments must be positive"));
        }
        Ok(())
    }

    /// True if weights saved for `other` can be loaded into this shape.
    /// Dropout rates may differ.
    pub fn same_shape(&self, other: &ModelConfig) -> bool {
        (self.vocab_size, self.dim, self.n_layers, self.n_heads, self.dim_ff, self.max_len, self.n_segments)
            == (other.vocab_size, other.dim, other.n_layers, other.n_heads, other.dim_ff, other.max_len, other.n_segments)
    }

    /// Checks that `seq` can be embedded by an encoder of this shape:
    /// 1 ≤ len ≤ max_len, ids < vocab_size, segments < n_segments.
    pub fn check_tokens(&self, seq: &TokenSequence) -> crate::domain::error::Result<()> {
        if seq.is_empty() || seq.len() > self.max_len {
            return Err(UdaError::shape(
                format!("token sequence (1..={} tokens)", self.max_len),
                &[self.max_len],
                &[seq.len()],
            ));
        }
        if let Some(&id) = seq.input_ids.iter().find(|&&id| id as usize >= self.vocab_size) {
            return Err(UdaError::config(format!(
                "token id {id} is outside the vocabulary of {} entries",
                self.vocab_size
            )));
        }
        if let Some(&seg) = seq.segment_ids.iter().find(|&&s| s as usize >= self.n_segments) {
            return Err(UdaError::config(format!(
                "segment id {seg} is outside the {} segment types",
                self.n_segments
            )));
        }
        Ok(())
    }
}

/// Encoder shape plus the number of output classes
#[derive(Config, Debug)]
pub struct ClassifierConfig {
    pub model:       ModelConfig,
    pub num_classes: usize,
}

impl ClassifierConfig {
    pub fn validate(&self) -> crate::domain::error::Result<()> {
        self.model.validate()?;
        if self.num_classes < 2 {
            return Err(UdaError::config(format!(
                "num_classes must be at least 2, got {}",
                self.num_classes
            )));
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Classifier<B> {
        Classifier::new(&self.model, self.num_classes, device)
    }
}
