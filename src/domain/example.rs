// ============================================================
// Layer 3 — Example Domain Types
// ============================================================
// One pre-tokenised training example, before batching.
//
//   LabeledExample  — token sequence + class index
//   UnlabeledPair   — "original" and "augmented" views of the
//                     same source sentence
//
// All three co-indexed sequences of a TokenSequence share one
// length. attention_mask[i] = 0 marks a padding position.

use serde::{Deserialize, Serialize};

use crate::domain::error::{Result, UdaError};

/// Token ids, segment ids and attention mask of one example
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSequence {
    pub input_ids:      Vec<u32>,
    pub segment_ids:    Vec<u32>,
    pub attention_mask: Vec<u32>,
}

impl TokenSequence {
    pub fn new(input_ids: Vec<u32>, segment_ids: Vec<u32>, attention_mask: Vec<u32>) -> Result<Self> {
        let seq = Self { input_ids, segment_ids, attention_mask };
        seq.validate()?;
        Ok(seq)
    }

    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        let len = self.input_ids.len();
        if self.segment_ids.len() != len || self.attention_mask.len() != len {
            return Err(UdaError::shape(
                "token sequence (ids, segments, mask)",
                &[len, len, len],
                &[len, self.segment_ids.len(), self.attention_mask.len()],
            ));
        }
        if let Some(&bad) = self.attention_mask.iter().find(|&&m| m > 1) {
            return Err(UdaError::config(format!("attention mask value {bad} is not 0 or 1")));
        }
        Ok(())
    }
}

/// A token sequence with its gold class index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledExample {
    pub tokens: TokenSequence,
    pub label:  usize,
}

impl LabeledExample {
    pub fn new(tokens: TokenSequence, label: usize) -> Self {
        Self { tokens, label }
    }
}

/// Unperturbed and perturbed views of one unlabeled sentence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlabeledPair {
    pub original:  TokenSequence,
    pub augmented: TokenSequence,
}

impl UnlabeledPair {
    pub fn new(original: TokenSequence, augmented: TokenSequence) -> Self {
        Self { original, augmented }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_sequence() {
        let seq = TokenSequence::new(vec![101, 7, 102, 0], vec![0; 4], vec![1, 1, 1, 0]).unwrap();
        assert_eq!(seq.len(), 4);
        assert!(!seq.is_empty());
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let err = TokenSequence::new(vec![101, 102], vec![0], vec![1, 1]).unwrap_err();
        assert!(matches!(err, UdaError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_non_binary_mask_rejected() {
        let err = TokenSequence::new(vec![101, 102], vec![0, 0], vec![1, 2]).unwrap_err();
        assert!(matches!(err, UdaError::InvalidConfig(_)));
    }
}
