// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// This layer takes pre-tokenised TSV files all the way to
// device-resident tensor batches.
//
//   TSV files
//       │
//       ▼
//   TsvExampleReader  → parses JSON id lists, validates rows
//       │
//       ▼
//   Labeled/UnlabeledDataset → implements Burn's Dataset trait
//       │
//       ▼
//   Labeled/UnlabeledBatcher → stacks examples into tensor batches
//       │
//       ▼
//   DataLoader        → feeds batches to the training loop
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Reads pre-tokenised labeled and unlabeled TSV files
pub mod loader;

/// Implements Burn's Dataset trait for both example kinds
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;
