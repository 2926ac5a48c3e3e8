// ============================================================
// Layer 5 — Transformer Encoder
// ============================================================
// BERT-style encoder: token + position + segment embeddings,
// then L self-attention blocks (post-norm).
//
// Shapes throughout: B = batch, S = seq_len, D = dim, H = heads,
// W = D / H.
//
// Mixup hooks:
//   - MixPoint::Embedding mixes token embeddings before the
//     position / segment terms are added.
//   - MixPoint::Block(k) mixes the output of block k. When the plan
//     carries clone ids, the clone batch runs through blocks 1..=k
//     in parallel and its block-k output is the mixing partner.

use burn::{
    nn::{
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::{gelu, softmax},
};

use crate::data::batcher::TokenBatch;
use crate::ml::{
    config::ModelConfig,
    mixup::{MixPoint, MixupPlan},
};

/// Added to attention scores at padded key positions
const MASK_BIAS: f64 = -10000.0;
const LAYER_NORM_EPS: f64 = 1e-12;

/// [B, S] 0/1 mask → [B, 1, 1, S] additive bias (0 or -10000).
///
/// A row whose mask is entirely 0 shifts every score by the same
/// constant, so it attends exactly as if unmasked and stays finite.
pub fn attention_bias<B: Backend>(mask: &Tensor<B, 2, Int>) -> Tensor<B, 4> {
    let [batch_size, seq_len] = mask.dims();
    mask.clone()
        .float()
        .neg()
        .add_scalar(1.0)
        .mul_scalar(MASK_BIAS)
        .reshape([batch_size, 1, 1, seq_len])
}

// ─── Embeddings ───────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Embeddings<B: Backend> {
    pub tok_embed: Embedding<B>,
    pub pos_embed: Embedding<B>,
    pub seg_embed: Embedding<B>,
    pub norm:      LayerNorm<B>,
    pub dropout:   Dropout,
}

/// The embedding stage either yields one hidden tensor, or the input
/// and clone hidden tensors side by side for a later block-level mix.
pub enum EmbeddingOutput<B: Backend> {
    Single(Tensor<B, 3>),
    Paired {
        primary: Tensor<B, 3>,
        clone:   Tensor<B, 3>,
    },
}

impl<B: Backend> Embeddings<B> {
    pub fn new(cfg: &ModelConfig, device: &B::Device) -> Self {
        Self {
            tok_embed: EmbeddingConfig::new(cfg.vocab_size, cfg.dim).init(device),
            pos_embed: EmbeddingConfig::new(cfg.max_len, cfg.dim).init(device),
            seg_embed: EmbeddingConfig::new(cfg.n_segments, cfg.dim).init(device),
            norm:      LayerNormConfig::new(cfg.dim).with_epsilon(LAYER_NORM_EPS).init(device),
            dropout:   DropoutConfig::new(cfg.p_drop_hidden).init(),
        }
    }

    pub fn forward(
        &self,
        input_ids:   Tensor<B, 2, Int>,
        segment_ids: Tensor<B, 2, Int>,
        mixup:       Option<&MixupPlan<B>>,
    ) -> EmbeddingOutput<B> {
        let [batch_size, seq_len] = input_ids.dims();

        let positions = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &input_ids.device())
            .unsqueeze::<2>()
            .expand([batch_size, seq_len]);
        let pos_e   = self.pos_embed.forward(positions);
        let seg_e   = self.seg_embed.forward(segment_ids);
        let token_e = self.tok_embed.forward(input_ids);

        let Some(plan) = mixup else {
            return EmbeddingOutput::Single(self.finish(token_e + pos_e + seg_e));
        };

        match (plan.point, &plan.clone_ids) {
            (MixPoint::Embedding, Some(clone_ids)) => {
                let clone_e = self.tok_embed.forward(clone_ids.clone());
                let token_e = plan.mix_pair(token_e, clone_e);
                EmbeddingOutput::Single(self.finish(token_e + pos_e + seg_e))
            }
            (MixPoint::Embedding, None) => {
                let token_e = plan.mix_self(token_e);
                EmbeddingOutput::Single(self.finish(token_e + pos_e + seg_e))
            }
            (MixPoint::Block(_), Some(clone_ids)) => {
                let clone_e = self.tok_embed.forward(clone_ids.clone());
                let primary = self.finish(token_e + pos_e.clone() + seg_e.clone());
                let clone   = self.finish(clone_e + pos_e + seg_e);
                let clone   = if plan.detach_clone { clone.detach() } else { clone };
                EmbeddingOutput::Paired { primary, clone }
            }
            _ => EmbeddingOutput::Single(self.finish(token_e + pos_e + seg_e)),
        }
    }

    fn finish(&self, e: Tensor<B, 3>) -> Tensor<B, 3> {
        self.dropout.forward(self.norm.forward(e))
    }
}

// ─── Multi-Headed Self-Attention ──────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct MultiHeadedSelfAttention<B: Backend> {
    pub proj_q:  Linear<B>,
    pub proj_k:  Linear<B>,
    pub proj_v:  Linear<B>,
    pub dropout: Dropout,
    pub n_heads: usize,
}

impl<B: Backend> MultiHeadedSelfAttention<B> {
    pub fn new(cfg: &ModelConfig, device: &B::Device) -> Self {
        Self {
            proj_q:  LinearConfig::new(cfg.dim, cfg.dim).init(device),
            proj_k:  LinearConfig::new(cfg.dim, cfg.dim).init(device),
            proj_v:  LinearConfig::new(cfg.dim, cfg.dim).init(device),
            dropout: DropoutConfig::new(cfg.p_drop_attn).init(),
            n_heads: cfg.n_heads,
        }
    }

    /// x: [B, S, D], bias: [B, 1, 1, S] → [B, S, D]
    pub fn forward(&self, x: Tensor<B, 3>, bias: Tensor<B, 4>) -> Tensor<B, 3> {
        self.forward_with_scores(x, bias).0
    }

    /// Also returns the post-softmax attention weights [B, H, S, S]
    /// for inspection.
    pub fn forward_with_scores(&self, x: Tensor<B, 3>, bias: Tensor<B, 4>) -> (Tensor<B, 3>, Tensor<B, 4>) {
        let [batch_size, seq_len, dim] = x.dims();
        let width = dim / self.n_heads;

        // (B, S, D) → (B, S, H, W) → (B, H, S, W)
        let split = |t: Tensor<B, 3>| {
            t.reshape([batch_size, seq_len, self.n_heads, width]).swap_dims(1, 2)
        };
        let q = split(self.proj_q.forward(x.clone()));
        let k = split(self.proj_k.forward(x.clone()));
        let v = split(self.proj_v.forward(x));

        let scores = q.matmul(k.swap_dims(2, 3)).div_scalar((width as f64).sqrt());
        let scores = scores + bias.expand([batch_size, self.n_heads, seq_len, seq_len]);
        let weights = softmax(scores, 3);

        let h = self.dropout.forward(weights.clone())
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch_size, seq_len, dim]);
        (h, weights)
    }
}

// ─── Block ────────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Block<B: Backend> {
    pub attn:    MultiHeadedSelfAttention<B>,
    pub proj:    Linear<B>,
    pub norm1:   LayerNorm<B>,
    pub ff_fc1:  Linear<B>,
    pub ff_fc2:  Linear<B>,
    pub norm2:   LayerNorm<B>,
    pub dropout: Dropout,
}

impl<B: Backend> Block<B> {
    pub fn new(cfg: &ModelConfig, device: &B::Device) -> Self {
        Self {
            attn:    MultiHeadedSelfAttention::new(cfg, device),
            proj:    LinearConfig::new(cfg.dim, cfg.dim).init(device),
            norm1:   LayerNormConfig::new(cfg.dim).with_epsilon(LAYER_NORM_EPS).init(device),
            ff_fc1:  LinearConfig::new(cfg.dim, cfg.dim_ff).init(device),
            ff_fc2:  LinearConfig::new(cfg.dim_ff, cfg.dim).init(device),
            norm2:   LayerNormConfig::new(cfg.dim).with_epsilon(LAYER_NORM_EPS).init(device),
            dropout: DropoutConfig::new(cfg.p_drop_hidden).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>, bias: Tensor<B, 4>) -> Tensor<B, 3> {
        let h = self.attn.forward(x.clone(), bias);
        let h = self.norm1.forward(x + self.dropout.forward(self.proj.forward(h)));
        let ff = self.ff_fc2.forward(gelu(self.ff_fc1.forward(h.clone())));
        self.norm2.forward(h + self.dropout.forward(ff))
    }
}

// ─── Encoder ──────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    pub embeddings: Embeddings<B>,
    pub blocks:     Vec<Block<B>>,
}

impl<B: Backend> Encoder<B> {
    pub fn new(cfg: &ModelConfig, device: &B::Device) -> Self {
        let blocks = (0..cfg.n_layers).map(|_| Block::new(cfg, device)).collect();
        Self { embeddings: Embeddings::new(cfg, device), blocks }
    }

    pub fn n_layers(&self) -> usize {
        self.blocks.len()
    }

    /// tokens: [B, S] → hidden states [B, S, D]
    pub fn forward(&self, tokens: &TokenBatch<B>, mixup: Option<&MixupPlan<B>>) -> Tensor<B, 3> {
        let bias = attention_bias(tokens.attention_mask());

        let (mut h, mut clone) = match self.embeddings.forward(
            tokens.input_ids().clone(),
            tokens.segment_ids().clone(),
            mixup,
        ) {
            EmbeddingOutput::Single(h) => (h, None),
            EmbeddingOutput::Paired { primary, clone } => (primary, Some(clone)),
        };

        for (i, block) in self.blocks.iter().enumerate() {
            let layer = i + 1;
            h = block.forward(h, bias.clone());

            clone = clone.map(|c| block.forward(c, bias.clone()));
            if let Some(plan) = mixup.filter(|p| p.is_block(layer)) {
                h = match clone.take() {
                    Some(c) => plan.mix_pair(h, c),
                    None    => plan.mix_self(h),
                };
            }
        }
        h
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::mixup::{permutation_tensor, MixDraw};
    use burn::backend::NdArray;

    type B = NdArray;

    fn tiny_config() -> ModelConfig {
        ModelConfig::new(50)
            .with_dim(16)
            .with_n_layers(2)
            .with_n_heads(4)
            .with_dim_ff(32)
            .with_max_len(12)
    }

    fn tokens(ids: [[i32; 6]; 2], mask: [[i32; 6]; 2]) -> TokenBatch<B> {
        let device = Default::default();
        TokenBatch::new(
            Tensor::<B, 2, Int>::from_ints(ids, &device),
            Tensor::<B, 2, Int>::zeros([2, 6], &device),
            Tensor::<B, 2, Int>::from_ints(mask, &device),
        )
        .unwrap()
    }

    fn max_abs_diff<const D: usize>(a: Tensor<B, D>, b: Tensor<B, D>) -> f32 {
        (a - b).abs().max().into_scalar()
    }

    #[test]
    fn test_attention_bias_values() {
        let device = Default::default();
        let mask   = Tensor::<B, 2, Int>::from_ints([[1, 1, 0]], &device);
        let bias: Vec<f32> = attention_bias(&mask).into_data().to_vec().unwrap();
        assert_eq!(bias, vec![0.0, 0.0, -10000.0]);
    }

    #[test]
    fn test_encoder_output_shape() {
        let device  = Default::default();
        let encoder = Encoder::<B>::new(&tiny_config(), &device);
        let batch   = tokens([[1, 5, 6, 2, 0, 0], [1, 7, 8, 9, 2, 0]], [[1, 1, 1, 1, 0, 0], [1, 1, 1, 1, 1, 0]]);
        assert_eq!(encoder.forward(&batch, None).dims(), [2, 6, 16]);
    }

    #[test]
    fn test_padding_positions_get_no_attention() {
        let device = Default::default();
        let cfg    = tiny_config();
        let attn   = MultiHeadedSelfAttention::<B>::new(&cfg, &device);
        let x      = Tensor::<B, 3>::random([1, 4, 16], burn::tensor::Distribution::Default, &device);
        let mask   = Tensor::<B, 2, Int>::from_ints([[1, 1, 0, 0]], &device);

        let (_, weights) = attn.forward_with_scores(x, attention_bias(&mask));
        let padded: f32 = weights.narrow(3, 2, 2).sum().into_scalar();
        assert!(padded < 1e-6);
    }

    #[test]
    fn test_fully_padded_row_is_finite() {
        let device  = Default::default();
        let encoder = Encoder::<B>::new(&tiny_config(), &device);
        let batch   = tokens([[1, 5, 6, 2, 0, 0], [0, 0, 0, 0, 0, 0]], [[1, 1, 1, 1, 0, 0], [0, 0, 0, 0, 0, 0]]);
        let h       = encoder.forward(&batch, None);
        assert!(!h.is_nan().any().into_scalar());
    }

    #[test]
    fn test_embedding_mix_with_lambda_one_is_noop() {
        let device  = Default::default();
        let encoder = Encoder::<B>::new(&tiny_config(), &device);
        let batch   = tokens([[1, 5, 6, 2, 0, 0], [1, 7, 8, 9, 2, 0]], [[1, 1, 1, 1, 0, 0], [1, 1, 1, 1, 1, 0]]);

        let draw = MixDraw { lambda: 1.0, permutation: permutation_tensor::<B>(&[1, 0], &device) };
        let plan = MixupPlan::new(MixPoint::Embedding, &draw);

        let plain = encoder.forward(&batch, None);
        let mixed = encoder.forward(&batch, Some(&plan));
        assert!(max_abs_diff(plain, mixed) < 1e-6);
    }

    #[test]
    fn test_block_mix_with_clone_ids() {
        let device  = Default::default();
        let encoder = Encoder::<B>::new(&tiny_config(), &device);
        let batch   = tokens([[1, 5, 6, 2, 0, 0], [1, 7, 8, 9, 2, 0]], [[1, 1, 1, 1, 0, 0], [1, 1, 1, 1, 1, 0]]);

        // λ = 0 with the identity permutation: block 2 output is the clone's
        let draw  = MixDraw { lambda: 0.0, permutation: permutation_tensor::<B>(&[0, 1], &device) };
        let clone = Tensor::<B, 2, Int>::from_ints([[1, 9, 9, 2, 0, 0], [1, 3, 3, 3, 2, 0]], &device);
        let plan  = MixupPlan::new(MixPoint::Block(2), &draw).with_clone_ids(clone.clone(), true);

        let clone_batch = TokenBatch::new(
            clone,
            batch.segment_ids().clone(),
            batch.attention_mask().clone(),
        )
        .unwrap();
        let expected = encoder.forward(&clone_batch, None);
        let mixed    = encoder.forward(&batch, Some(&plan));
        assert!(max_abs_diff(expected, mixed) < 1e-5);
    }
}
