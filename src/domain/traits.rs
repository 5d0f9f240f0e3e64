// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The searcher only needs two things from a transducer:
//   1. advance the prediction network by one token
//   2. score every vocabulary entry for one encoder frame
//      given the current prediction network output
//
// Putting that behind a trait keeps the beam search free of
// Burn types, so it can be unit tested with a scripted decoder
// and reused by both the validation loop and `transcribe`.

use anyhow::Result;

// ─── StepDecoder ──────────────────────────────────────────────────────────────
/// Step-wise access to a transducer's prediction and joint networks,
/// bound to the encoder output of a single utterance.
///
/// Implementations:
///   - UtteranceDecoder → wraps a TransducerModel and one encoded utterance
///   - ScriptedDecoder  → fixed score tables, used in tests
pub trait StepDecoder {
    /// Prediction network state after a token has been consumed
    type State: Clone;

    /// Number of encoder frames available for this utterance
    fn num_frames(&self) -> usize;

    /// Feed `token` into the prediction network, starting from
    /// `state` (or from the initial state when `None`).
    fn predict(&self, token: usize, state: Option<&Self::State>) -> Result<Self::State>;

    /// Log-probabilities over the whole vocabulary for encoder
    /// frame `frame` combined with prediction state `state`.
    fn joint(&self, frame: usize, state: &Self::State) -> Result<Vec<f32>>;
}

// ─── Transcriber ──────────────────────────────────────────────────────────────
/// Any component that can turn an audio file into a label sequence.
///
/// Implementations:
///   - TranscribeUseCase → uses a trained transducer checkpoint
pub trait Transcriber {
    /// Returns the decoded labels of the best hypothesis.
    fn transcribe(&self, wav_path: &str) -> Result<Vec<String>>;
}
