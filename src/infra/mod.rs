// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns that don't belong in any specific
// business layer:
//
//   checkpoint.rs — Saving and loading a trained recognizer
//                   Model weights via Burn's CompactRecorder,
//                   plus the model config, hyperparameters,
//                   label encoder and normalization statistics
//                   as JSON so `transcribe` can rebuild it.
//
//   metrics.rs    — Phoneme error rate and epoch logging
//                   Levenshtein alignment with insertion /
//                   deletion / substitution counts, and a CSV
//                   row per validated epoch.
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)

/// Recognizer checkpoint saving and loading
pub mod checkpoint;

/// Error-rate statistics and the metrics CSV logger
pub mod metrics;
