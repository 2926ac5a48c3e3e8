// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns used by the training loop and the
// use cases:
//
//   checkpoint.rs — Saving and loading classifier weights
//                   (trainable and EMA teacher) with Burn's
//                   CompactRecorder, plus the run config as JSON
//                   so `eval` can rebuild the model.
//
//   metrics.rs    — Step-level loss and accuracy rows appended
//                   to a CSV file.
//
// Reference: Rust Book §7 (Modules)
//            Burn Book §5 (Checkpointing)

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;
