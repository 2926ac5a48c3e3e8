// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs, enums and traits shared by every other
// layer. No burn types and no file I/O live here.
//
//   example.rs — token sequences, labeled examples, unlabeled pairs
//   error.rs   — the UdaError taxonomy
//   traits.rs  — ExampleSource and MixupRng abstractions

pub mod error;

pub mod example;

pub mod traits;
