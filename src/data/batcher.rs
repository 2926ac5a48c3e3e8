// ============================================================
// Layer 4 — Token Batches and Batchers
// ============================================================
// Implements Burn's Batcher trait to stack pre-tokenised examples
// into [batch, seq_len] Int tensors.
//
//   TokenBatch     — ids + segment ids + attention mask
//   LabeledBatch   — TokenBatch + class labels [batch]
//   UnlabeledBatch — original and augmented TokenBatches
//
// Every sequence in a dataset is padded to one length at load
// time (see dataset.rs), so batching is a flatten + reshape:
//   [s1_t1, ..., s1_tS, s2_t1, ..., sN_tS] → [N, S]
//
// The three tensors of a TokenBatch are only reachable through
// accessors; `new` checks that they agree in shape.

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::domain::{
    error::{Result, UdaError},
    example::{LabeledExample, TokenSequence, UnlabeledPair},
};

// ─── TokenBatch ───────────────────────────────────────────────────────────────
/// ids, segment ids and attention mask, all shaped [batch, seq_len]
#[derive(Debug, Clone)]
pub struct TokenBatch<B: Backend> {
    input_ids:      Tensor<B, 2, Int>,
    segment_ids:    Tensor<B, 2, Int>,
    attention_mask: Tensor<B, 2, Int>,
}

impl<B: Backend> TokenBatch<B> {
    pub fn new(
        input_ids:      Tensor<B, 2, Int>,
        segment_ids:    Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
    ) -> Result<Self> {
        let expected = input_ids.dims();
        for (name, dims) in [("segment ids", segment_ids.dims()), ("attention mask", attention_mask.dims())] {
            if dims != expected {
                return Err(UdaError::shape(format!("token batch {name}"), &expected, &dims));
            }
        }
        Ok(Self { input_ids, segment_ids, attention_mask })
    }

    /// Build from sequences already checked to share one length.
    fn from_sequences(sequences: &[&TokenSequence], device: &B::Device) -> Self {
        let batch_size = sequences.len();
        let seq_len    = sequences.first().map(|s| s.len()).unwrap_or(0);

        let stack = |field: fn(&TokenSequence) -> &Vec<u32>| {
            let flat: Vec<i32> = sequences
                .iter()
                .flat_map(|s| field(s).iter().map(|&x| x as i32))
                .collect();
            Tensor::<B, 1, Int>::from_ints(flat.as_slice(), device).reshape([batch_size, seq_len])
        };

        Self {
            input_ids:      stack(|s| &s.input_ids),
            segment_ids:    stack(|s| &s.segment_ids),
            attention_mask: stack(|s| &s.attention_mask),
        }
    }

    pub fn input_ids(&self) -> &Tensor<B, 2, Int> {
        &self.input_ids
    }

    pub fn segment_ids(&self) -> &Tensor<B, 2, Int> {
        &self.segment_ids
    }

    pub fn attention_mask(&self) -> &Tensor<B, 2, Int> {
        &self.attention_mask
    }

    pub fn batch_size(&self) -> usize {
        self.input_ids.dims()[0]
    }

    pub fn seq_len(&self) -> usize {
        self.input_ids.dims()[1]
    }

    pub fn device(&self) -> B::Device {
        self.input_ids.device()
    }

    pub fn into_parts(self) -> (Tensor<B, 2, Int>, Tensor<B, 2, Int>, Tensor<B, 2, Int>) {
        (self.input_ids, self.segment_ids, self.attention_mask)
    }

    /// Concatenate along the batch axis. Sequence lengths must agree.
    pub fn cat(batches: Vec<Self>) -> Result<Self> {
        let Some(first) = batches.first() else {
            return Err(UdaError::config("cannot concatenate an empty list of token batches"));
        };
        let seq_len = first.seq_len();
        for batch in &batches {
            if batch.seq_len() != seq_len {
                return Err(UdaError::shape(
                    "concatenated token batches (seq_len)",
                    &[seq_len],
                    &[batch.seq_len()],
                ));
            }
        }

        let mut ids  = Vec::with_capacity(batches.len());
        let mut segs = Vec::with_capacity(batches.len());
        let mut mask = Vec::with_capacity(batches.len());
        for batch in batches {
            let (i, s, m) = batch.into_parts();
            ids.push(i);
            segs.push(s);
            mask.push(m);
        }
        Ok(Self {
            input_ids:      Tensor::cat(ids, 0),
            segment_ids:    Tensor::cat(segs, 0),
            attention_mask: Tensor::cat(mask, 0),
        })
    }
}

// ─── LabeledBatch ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct LabeledBatch<B: Backend> {
    tokens: TokenBatch<B>,
    labels: Tensor<B, 1, Int>,
}

impl<B: Backend> LabeledBatch<B> {
    pub fn new(tokens: TokenBatch<B>, labels: Tensor<B, 1, Int>) -> Result<Self> {
        let [n_labels] = labels.dims();
        if n_labels != tokens.batch_size() {
            return Err(UdaError::shape("labeled batch labels", &[tokens.batch_size()], &[n_labels]));
        }
        Ok(Self { tokens, labels })
    }

    pub fn tokens(&self) -> &TokenBatch<B> {
        &self.tokens
    }

    pub fn labels(&self) -> &Tensor<B, 1, Int> {
        &self.labels
    }

    pub fn batch_size(&self) -> usize {
        self.tokens.batch_size()
    }
}

// ─── UnlabeledBatch ───────────────────────────────────────────────────────────
/// Row i of `original` and row i of `augmented` are two views of one sentence.
#[derive(Debug, Clone)]
pub struct UnlabeledBatch<B: Backend> {
    original:  TokenBatch<B>,
    augmented: TokenBatch<B>,
}

impl<B: Backend> UnlabeledBatch<B> {
    pub fn new(original: TokenBatch<B>, augmented: TokenBatch<B>) -> Result<Self> {
        if original.batch_size() != augmented.batch_size() {
            return Err(UdaError::shape(
                "unlabeled batch (original vs augmented rows)",
                &[original.batch_size()],
                &[augmented.batch_size()],
            ));
        }
        Ok(Self { original, augmented })
    }

    pub fn original(&self) -> &TokenBatch<B> {
        &self.original
    }

    pub fn augmented(&self) -> &TokenBatch<B> {
        &self.augmented
    }

    pub fn batch_size(&self) -> usize {
        self.original.batch_size()
    }
}

// ─── Batchers ─────────────────────────────────────────────────────────────────
/// Holds the target device so tensors are created on the right GPU/CPU.
#[derive(Clone, Debug)]
pub struct LabeledBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> LabeledBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<LabeledExample, LabeledBatch<B>> for LabeledBatcher<B> {
    fn batch(&self, items: Vec<LabeledExample>) -> LabeledBatch<B> {
        let sequences: Vec<&TokenSequence> = items.iter().map(|e| &e.tokens).collect();
        let labels: Vec<i32> = items.iter().map(|e| e.label as i32).collect();

        LabeledBatch {
            tokens: TokenBatch::from_sequences(&sequences, &self.device),
            labels: Tensor::<B, 1, Int>::from_ints(labels.as_slice(), &self.device),
        }
    }
}

#[derive(Clone, Debug)]
pub struct UnlabeledBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> UnlabeledBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<UnlabeledPair, UnlabeledBatch<B>> for UnlabeledBatcher<B> {
    fn batch(&self, items: Vec<UnlabeledPair>) -> UnlabeledBatch<B> {
        let original:  Vec<&TokenSequence> = items.iter().map(|p| &p.original).collect();
        let augmented: Vec<&TokenSequence> = items.iter().map(|p| &p.augmented).collect();

        UnlabeledBatch {
            original:  TokenBatch::from_sequences(&original, &self.device),
            augmented: TokenBatch::from_sequences(&augmented, &self.device),
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    fn seq(ids: &[u32]) -> TokenSequence {
        let mask = ids.iter().map(|&t| u32::from(t != 0)).collect();
        TokenSequence::new(ids.to_vec(), vec![0; ids.len()], mask).unwrap()
    }

    #[test]
    fn test_labeled_batcher_shapes() {
        let device  = Default::default();
        let batcher = LabeledBatcher::<B>::new(device);
        let batch   = batcher.batch(vec![
            LabeledExample::new(seq(&[101, 5, 102, 0]), 1),
            LabeledExample::new(seq(&[101, 6, 7, 102]), 0),
        ]);

        assert_eq!(batch.tokens().input_ids().dims(), [2, 4]);
        assert_eq!(batch.labels().dims(), [2]);
        let mask: Vec<i64> = batch.tokens().attention_mask().to_data().convert::<i64>().to_vec().unwrap();
        assert_eq!(mask, vec![1, 1, 1, 0, 1, 1, 1, 1]);
    }

    #[test]
    fn test_unlabeled_batcher_keeps_views_aligned() {
        let device  = Default::default();
        let batcher = UnlabeledBatcher::<B>::new(device);
        let batch   = batcher.batch(vec![
            UnlabeledPair::new(seq(&[101, 9, 102]), seq(&[101, 8, 102])),
            UnlabeledPair::new(seq(&[101, 3, 102]), seq(&[101, 4, 102])),
        ]);

        let aug: Vec<i64> = batch.augmented().input_ids().to_data().convert::<i64>().to_vec().unwrap();
        assert_eq!(aug, vec![101, 8, 102, 101, 4, 102]);
        assert_eq!(batch.batch_size(), 2);
    }

    #[test]
    fn test_mismatched_mask_rejected() {
        let device = Default::default();
        let ids  = Tensor::<B, 2, Int>::zeros([2, 4], &device);
        let segs = Tensor::<B, 2, Int>::zeros([2, 4], &device);
        let mask = Tensor::<B, 2, Int>::zeros([2, 3], &device);
        let err  = TokenBatch::new(ids, segs, mask).unwrap_err();
        assert!(matches!(err, UdaError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_label_count_mismatch_rejected() {
        let device = Default::default();
        let zeros  = || Tensor::<B, 2, Int>::zeros([3, 4], &device);
        let tokens = TokenBatch::new(zeros(), zeros(), zeros()).unwrap();
        let labels = Tensor::<B, 1, Int>::zeros([2], &device);
        assert!(LabeledBatch::new(tokens, labels).is_err());
    }

    #[test]
    fn test_cat_joins_rows() {
        let device = Default::default();
        let make   = |n: usize, len: usize| {
            let z = || Tensor::<B, 2, Int>::zeros([n, len], &device);
            TokenBatch::new(z(), z(), z()).unwrap()
        };

        let joined = TokenBatch::cat(vec![make(2, 5), make(3, 5)]).unwrap();
        assert_eq!(joined.batch_size(), 5);
        assert_eq!(joined.seq_len(), 5);

        assert!(TokenBatch::cat(vec![make(2, 5), make(2, 6)]).is_err());
    }
}
