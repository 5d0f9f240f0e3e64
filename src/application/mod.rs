// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates all the other layers to accomplish
// a specific goal (training or transcribing audio).
//
// Rules for this layer:
//   - No ML math or model code here
//   - Stage reports are printed by the Brain; everything else
//     reaching the user goes through Layer 1
//   - File formats belong to Layer 4 and 6
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// Hyperparameter file and the builders derived from it
pub mod hparams;

// The training workflow
pub mod train_use_case;

// Decoding WAV files with a trained checkpoint
pub mod transcribe_use_case;
