// ============================================================
// Layer 3 — Error Taxonomy
// ============================================================
// Typed errors raised by the model, loss engine and data layers.
// The application and CLI layers wrap these in anyhow::Error.
//
//   ShapeMismatch  — batches whose tensors disagree in size
//   InvalidConfig  — unknown schedule / criterion names, bad values
//   Data           — malformed rows in a pre-tokenised file
//   Io             — underlying filesystem errors
//
// Degenerate loss masks are NOT errors: the masked mean floors
// its denominator at 1 and returns 0.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum UdaError {
    /// Two tensors that must share a dimension do not
    #[error("Shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context:  String,
        expected: Vec<usize>,
        actual:   Vec<usize>,
    },

    /// Unrecognised option name or out-of-range value
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    /// A row in a data file could not be parsed
    #[error("Data error in '{path}' line {line}: {message}")]
    Data {
        path:    PathBuf,
        line:    usize,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UdaError {
    pub fn shape(context: impl Into<String>, expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            context:  context.into(),
            expected: expected.to_vec(),
            actual:   actual.to_vec(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

pub type Result<T> = std::result::Result<T, UdaError>;
