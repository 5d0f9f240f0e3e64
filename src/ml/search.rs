// ============================================================
// Layer 5 — Transducer Beam Search
// ============================================================
// Decodes one utterance frame by frame through a StepDecoder.
//
// beam_size == 1 → greedy: at every frame keep emitting the
//   best non-blank label (up to max_symbols_per_step), move on
//   at the first blank.
//
// beam_size  > 1 → the frame-synchronous search of Graves
//   (2012). Per frame, hypotheses waiting to be expanded
//   (`process`) are popped best-first; each is scored by the
//   joint, and of its top-k continuations
//
//     blank      → joins `beam` (the frame is finished for it)
//     label y    → rejoins `process` with y appended, kept only if
//                  within `expand_beam` of the best label score
//
//   A frame ends when `beam` holds beam_size hypotheses, when
//   the best finished hypothesis leads the best unfinished one
//   by `state_beam`, or when nothing is left to expand.
//
// Scores are compared after length normalization
// (log-prob / tokens), so long hypotheses are not penalised
// merely for emitting more labels.
//
// Reference: Graves (2012) Sequence Transduction with RNNs

use anyhow::Result;

use crate::domain::traits::StepDecoder;

#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    /// Emitted labels, without the start token
    pub tokens: Vec<usize>,
    /// Total log-probability
    pub score:  f32,
}

#[derive(Debug, Clone)]
pub struct TransducerBeamSearcher {
    pub blank_index:          usize,
    /// Token fed to the prediction network first
    pub start_index:          usize,
    pub beam_size:            usize,
    pub nbest:                usize,
    pub state_beam:           f32,
    pub expand_beam:          f32,
    pub max_symbols_per_step: usize,
}

/// A partial hypothesis; `prediction[0]` is the start token.
struct Partial<S> {
    prediction: Vec<usize>,
    score:      f32,
    state:      S,
    /// Labels emitted at the current frame
    emitted:    usize,
}

impl<S: Clone> Clone for Partial<S> {
    fn clone(&self) -> Self {
        Self {
            prediction: self.prediction.clone(),
            score:      self.score,
            state:      self.state.clone(),
            emitted:    self.emitted,
        }
    }
}

impl<S> Partial<S> {
    fn normalized(&self) -> f32 {
        self.score / self.prediction.len() as f32
    }
}

fn best_index<S>(hyps: &[Partial<S>]) -> Option<usize> {
    hyps.iter()
        .enumerate()
        .max_by(|a, b| a.1.normalized().total_cmp(&b.1.normalized()))
        .map(|(i, _)| i)
}

/// Indices of the `k` largest scores, best first.
fn top_k(scores: &[f32], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order.truncate(k);
    order
}

impl TransducerBeamSearcher {
    /// The single best hypothesis.
    pub fn decode<D: StepDecoder>(&self, decoder: &D) -> Result<Hypothesis> {
        let mut hyps = self.search(decoder)?;
        Ok(if hyps.is_empty() {
            Hypothesis { tokens: Vec::new(), score: 0.0 }
        } else {
            hyps.swap_remove(0)
        })
    }

    /// Up to `nbest` hypotheses, best first.
    pub fn search<D: StepDecoder>(&self, decoder: &D) -> Result<Vec<Hypothesis>> {
        if self.beam_size <= 1 {
            Ok(vec![self.greedy(decoder)?])
        } else {
            self.beam(decoder)
        }
    }

    fn greedy<D: StepDecoder>(&self, decoder: &D) -> Result<Hypothesis> {
        let mut tokens = Vec::new();
        let mut score = 0.0f32;
        let mut state = decoder.predict(self.start_index, None)?;

        for frame in 0..decoder.num_frames() {
            for _ in 0..self.max_symbols_per_step.max(1) {
                let log_probs = decoder.joint(frame, &state)?;
                let Some(&best) = top_k(&log_probs, 1).first() else {
                    break;
                };
                score += log_probs[best];
                if best == self.blank_index {
                    break;
                }
                tokens.push(best);
                state = decoder.predict(best, Some(&state))?;
            }
        }

        Ok(Hypothesis { tokens, score })
    }

    fn beam<D: StepDecoder>(&self, decoder: &D) -> Result<Vec<Hypothesis>> {
        let initial = Partial {
            prediction: vec![self.start_index],
            score:      0.0,
            state:      decoder.predict(self.start_index, None)?,
            emitted:    0,
        };
        let mut beam = vec![initial];

        for frame in 0..decoder.num_frames() {
            let mut process: Vec<Partial<D::State>> = std::mem::take(&mut beam);
            for hyp in process.iter_mut() {
                hyp.emitted = 0;
            }

            while beam.len() < self.beam_size {
                let Some(a_idx) = best_index(&process) else {
                    break;
                };
                if let Some(b_idx) = best_index(&beam) {
                    if beam[b_idx].score >= self.state_beam + process[a_idx].score {
                        break;
                    }
                }
                let a_best = process.swap_remove(a_idx);

                let log_probs = decoder.joint(frame, &a_best.state)?;
                let candidates = top_k(&log_probs, self.beam_size);
                let best_label = candidates
                    .iter()
                    .find(|&&k| k != self.blank_index)
                    .map(|&k| log_probs[k]);

                for &k in &candidates {
                    let score = a_best.score + log_probs[k];
                    if k == self.blank_index {
                        beam.push(Partial { score, ..a_best.clone() });
                        continue;
                    }
                    let within = best_label.is_some_and(|best| log_probs[k] >= best - self.expand_beam);
                    if !within || a_best.emitted >= self.max_symbols_per_step {
                        continue;
                    }
                    let state = decoder.predict(k, Some(&a_best.state))?;
                    let mut prediction = a_best.prediction.clone();
                    prediction.push(k);
                    process.push(Partial {
                        prediction,
                        score,
                        state,
                        emitted: a_best.emitted + 1,
                    });
                }
            }

            // nothing finished the frame: carry the unfinished ones over
            if beam.is_empty() {
                beam = process;
            }
        }

        beam.sort_by(|a, b| b.normalized().total_cmp(&a.normalized()));
        Ok(beam
            .into_iter()
            .take(self.nbest.max(1))
            .map(|h| Hypothesis { tokens: h.prediction[1..].to_vec(), score: h.score })
            .collect())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    /// Joint scores depend on the frame and the last emitted label.
    struct ScriptedDecoder {
        /// table[frame][last_label] → probabilities over the vocabulary
        table: Vec<Vec<Vec<f32>>>,
    }

    impl StepDecoder for ScriptedDecoder {
        type State = usize;

        fn num_frames(&self) -> usize {
            self.table.len()
        }

        fn predict(&self, token: usize, _state: Option<&usize>) -> Result<usize> {
            Ok(token)
        }

        fn joint(&self, frame: usize, state: &usize) -> Result<Vec<f32>> {
            Ok(self.table[frame][*state].iter().map(|p| p.ln()).collect())
        }
    }

    fn searcher(beam_size: usize) -> TransducerBeamSearcher {
        TransducerBeamSearcher {
            blank_index:          0,
            start_index:          1,
            beam_size,
            nbest:                2,
            state_beam:           2.3,
            expand_beam:          2.3,
            max_symbols_per_step: 3,
        }
    }

    /// vocab: 0 blank, 1 bos, 2 "a", 3 "b"
    /// frame 0 says "a" then blank, frame 1 says "b" then blank.
    fn script() -> ScriptedDecoder {
        let row = |p: [f32; 4]| p.to_vec();
        ScriptedDecoder {
            table: vec![
                vec![
                    row([0.1, 0.0, 0.1, 0.8]), // after blank (unused)
                    row([0.1, 0.01, 0.8, 0.09]), // after bos
                    row([0.9, 0.01, 0.05, 0.04]), // after a
                    row([0.9, 0.01, 0.05, 0.04]), // after b
                ],
                vec![
                    row([0.1, 0.0, 0.1, 0.8]),
                    row([0.1, 0.01, 0.09, 0.8]),
                    row([0.1, 0.01, 0.09, 0.8]), // after a
                    row([0.9, 0.01, 0.05, 0.04]), // after b
                ],
            ],
        }
    }

    #[test]
    fn test_greedy_follows_the_script() {
        let hyp = searcher(1).decode(&script()).unwrap();
        assert_eq!(hyp.tokens, vec![2, 3]);
        let expected = 0.8f32.ln() + 0.9f32.ln() + 0.8f32.ln() + 0.9f32.ln();
        assert!((hyp.score - expected).abs() < 1e-5);
    }

    #[test]
    fn test_beam_finds_the_same_best_path() {
        let hyps = searcher(3).search(&script()).unwrap();
        assert!(!hyps.is_empty() && hyps.len() <= 2);
        assert_eq!(hyps[0].tokens, vec![2, 3]);
    }

    #[test]
    fn test_beam_results_are_sorted() {
        let hyps = searcher(4).search(&script()).unwrap();
        let norm = |h: &Hypothesis| h.score / (h.tokens.len() + 1) as f32;
        for pair in hyps.windows(2) {
            assert!(norm(&pair[0]) >= norm(&pair[1]));
        }
    }

    #[test]
    fn test_symbol_cap_terminates() {
        // blank is never likely: without a cap this would emit forever
        let row = vec![0.01, 0.01, 0.97, 0.01];
        let decoder = ScriptedDecoder { table: vec![vec![row.clone(); 4]; 2] };
        let greedy = searcher(1).decode(&decoder).unwrap();
        assert_eq!(greedy.tokens.len(), 6);

        let beam = searcher(3).decode(&decoder).unwrap();
        assert!(beam.tokens.len() <= 6);
    }

    #[test]
    fn test_no_frames_gives_empty_hypothesis() {
        let decoder = ScriptedDecoder { table: vec![] };
        assert!(searcher(1).decode(&decoder).unwrap().tokens.is_empty());
        assert!(searcher(3).decode(&decoder).unwrap().tokens.is_empty());
    }
}
