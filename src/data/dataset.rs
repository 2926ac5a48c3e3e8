use burn::data::dataset::Dataset;

use crate::domain::{
    error::{Result, UdaError},
    example::{LabeledExample, TokenSequence, UnlabeledPair},
};
use crate::ml::config::ModelConfig;

/// Checks one sequence against the length shared by the whole dataset.
fn check_len(seq: &TokenSequence, expected: usize, index: usize) -> Result<()> {
    seq.validate()?;
    if seq.len() != expected {
        return Err(UdaError::shape(
            format!("example {index} (seq_len)"),
            &[expected],
            &[seq.len()],
        ));
    }
    Ok(())
}

/// Checks one sequence against the encoder's embedding tables.
fn check_fits(model: &ModelConfig, seq: &TokenSequence, index: usize) -> Result<()> {
    model.check_tokens(seq).map_err(|e| match e {
        UdaError::InvalidConfig(msg) => UdaError::config(format!("example {index}: {msg}")),
        other => other,
    })
}

/// Pre-tokenised labeled examples, all padded to one length.
pub struct LabeledDataset {
    examples: Vec<LabeledExample>,
    seq_len:  usize,
}

impl LabeledDataset {
    pub fn new(examples: Vec<LabeledExample>, num_classes: usize) -> Result<Self> {
        let seq_len = examples.first().map(|e| e.tokens.len()).unwrap_or(0);
        for (i, example) in examples.iter().enumerate() {
            check_len(&example.tokens, seq_len, i)?;
            if example.label >= num_classes {
                return Err(UdaError::config(format!(
                    "example {i} has label {} but there are only {num_classes} classes",
                    example.label
                )));
            }
        }
        Ok(Self { examples, seq_len })
    }

    pub fn seq_len(&self) -> usize { self.seq_len }

    /// Fails on the first example the encoder could not embed.
    pub fn check_model(&self, model: &ModelConfig) -> Result<()> {
        self.examples
            .iter()
            .enumerate()
            .try_for_each(|(i, e)| check_fits(model, &e.tokens, i))
    }

    /// Examples per class, indexed by label
    pub fn class_counts(&self, num_classes: usize) -> Vec<usize> {
        let mut counts = vec![0; num_classes];
        for example in &self.examples {
            if let Some(c) = counts.get_mut(example.label) {
                *c += 1;
            }
        }
        counts
    }
}

impl Dataset<LabeledExample> for LabeledDataset {
    fn get(&self, index: usize) -> Option<LabeledExample> {
        self.examples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.examples.len()
    }
}

/// Original / augmented pairs. Both views of every pair share one length.
pub struct UnlabeledDataset {
    pairs:   Vec<UnlabeledPair>,
    seq_len: usize,
}

impl UnlabeledDataset {
    pub fn new(pairs: Vec<UnlabeledPair>) -> Result<Self> {
        let seq_len = pairs.first().map(|p| p.original.len()).unwrap_or(0);
        for (i, pair) in pairs.iter().enumerate() {
            check_len(&pair.original, seq_len, i)?;
            check_len(&pair.augmented, seq_len, i)?;
        }
        Ok(Self { pairs, seq_len })
    }

    pub fn seq_len(&self) -> usize { self.seq_len }

    pub fn check_model(&self, model: &ModelConfig) -> Result<()> {
        for (i, pair) in self.pairs.iter().enumerate() {
            check_fits(model, &pair.original, i)?;
            check_fits(model, &pair.augmented, i)?;
        }
        Ok(())
    }
}

impl Dataset<UnlabeledPair> for UnlabeledDataset {
    fn get(&self, index: usize) -> Option<UnlabeledPair> {
        self.pairs.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.pairs.len()
    }
}
