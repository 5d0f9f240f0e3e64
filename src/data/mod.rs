// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// This layer handles everything from JSON manifests and WAV
// files all the way to padded tensor batches.
//
// The pipeline flows in this order:
//
//   train.json / dev.json
//       │
//       ▼
//   manifest          → records {id, wav, phn, ...}
//       │
//       ▼
//   DynamicItemDataset → lazy per-record pipelines
//       │                 wav → sig, phn → phn_list → phn_encoded → phn_encoded_bos
//       ▼
//   LabelEncoder      → phoneme ↔ id, plus blank / bos / eos
//       │
//       ▼
//   TransducerDataset → implements Burn's Dataset trait
//       │
//       ▼
//   TransducerBatcher → pads samples into tensor batches
//       │
//       ▼
//   DataLoader        → feeds batches to the Brain
//
// Feature extraction (fbank + normalization) lives here too,
// but runs inside the model wrapper's forward pass because
// global normalization statistics depend on the stage.
//
// Reference: Burn Book §4 (Datasets and Dataloaders)
//            Rust Book §13 (Iterators and Closures)

/// Typed errors for this layer
pub mod error;

/// JSON manifest reading with `$data_root` replacement
pub mod manifest;

/// WAV reading via hound
pub mod audio;

/// Filterbank features and input normalization
pub mod features;

/// Phoneme label encoder
pub mod encoder;

/// Datasets extended lazily by dynamic items
pub mod pipeline;

/// Train / valid datasets and encoder for a data folder
pub mod prep;

/// Implements Burn's Dataset trait for transducer samples
pub mod dataset;

/// Implements Burn's Batcher trait to create padded batches
pub mod batcher;

#[cfg(test)]
pub mod fixtures;
