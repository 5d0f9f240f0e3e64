// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// Everything that touches Burn modules, autodiff or the
// training loop lives here.
//
//   model.rs            — CRDNN encoder, prediction network,
//                         additive joint; step-wise decoder
//                         used by the beam searcher
//
//   frontend.rs         — fbank + normalization for a padded
//                         waveform batch
//
//   loss.rs             — RNN-Transducer loss (forward-backward
//                         on the host, gradient injected into
//                         the autodiff graph)
//
//   search.rs           — greedy and beam search over a
//                         StepDecoder
//
//   brain.rs            — the Brain trait: forward / objectives /
//                         stage hooks, plus fit() and evaluate()
//
//   transducer_brain.rs — the Brain of the phoneme recognizer
//
// Backends:
//   training   → Autodiff<NdArray>  (or Autodiff<Wgpu> with --features wgpu)
//   evaluation → the inner backend, through model.valid()
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Graves (2012) Sequence Transduction with RNNs

use burn::tensor::backend::AutodiffBackend;

/// RNN-Transducer architecture
pub mod model;

/// Feature extraction for waveform batches
pub mod frontend;

/// Transducer loss
pub mod loss;

/// Greedy and beam search decoding
pub mod search;

/// Generic training-loop trait
pub mod brain;

/// Brain implementation for the transducer
pub mod transducer_brain;

#[cfg(not(feature = "wgpu"))]
pub type TrainBackend = burn::backend::Autodiff<burn::backend::NdArray>;

#[cfg(feature = "wgpu")]
pub type TrainBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

/// Backend for inference, without autodiff
pub type InferBackend = <TrainBackend as AutodiffBackend>::InnerBackend;
