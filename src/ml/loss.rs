// ============================================================
// Layer 5 — Transducer Loss
// ============================================================
// Negative log-likelihood of the target sequence under an
// RNN-Transducer, summed over every alignment.
//
// For one utterance with T frames and U labels y_1..y_U the
// joint network gives log-probabilities lp(t, u, k) on a
// T × (U+1) lattice. A path starts at (0, 0) and either
//
//   emits blank   (t, u) → (t+1, u)      with lp(t, u, blank)
//   emits y_{u+1} (t, u) → (t, u+1)      with lp(t, u, y_{u+1})
//
// and must finish with a blank out of (T-1, U).
//
//   α(t, u) = logaddexp( α(t-1, u) + lp(t-1, u, blank),
//                        α(t, u-1) + lp(t, u-1, y_u) )
//   β(t, u) = logaddexp( β(t+1, u) + lp(t, u, blank),
//                        β(t, u+1) + lp(t, u, y_{u+1}) )
//
//   log P(y | x) = β(0, 0) = α(T-1, U) + lp(T-1, U, blank)
//
// Gradient w.r.t. the log-probabilities (before log-softmax):
//
//   ∂(-log P)/∂lp(t, u, blank)   = -exp(α(t,u) + lp + β(t+1,u) - log P)
//   ∂(-log P)/∂lp(t, u, y_{u+1}) = -exp(α(t,u) + lp + β(t,u+1) - log P)
//
// The lattice runs on the host in f64. Its gradient is pushed
// back into Burn's autodiff graph with a surrogate:
//
//   surrogate = Σ log_probs ⊙ grad        (grad is a constant)
//   loss      = surrogate - detach(surrogate) + nll
//
// The value of `loss` is exactly the NLL and its gradient is
// exactly `grad`, which Burn then carries through log-softmax,
// the joint, and both networks.
//
// Reference: Graves (2012) Sequence Transduction with RNNs

use anyhow::{bail, Result};
use burn::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    /// Average over the utterances of the batch
    Mean,
    /// Sum over the utterances of the batch
    Sum,
    /// Each utterance divided by its label count, then averaged
    #[serde(rename = "label_mean")]
    LabelMean,
}

// ─── Host lattice ─────────────────────────────────────────────────────────────

/// NLL and gradient of one utterance.
#[derive(Debug, Clone)]
pub struct LatticeResult {
    pub nll:  f64,
    /// Same layout as the input: `[T][U+1][V]` flattened
    pub grad: Vec<f64>,
}

fn log_add(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let m = a.max(b);
    m + ((a - m).exp() + (b - m).exp()).ln()
}

/// Forward–backward over one utterance.
///
/// `log_probs` is `[t_len][u_len + 1][vocab]` flattened, where
/// `u_len == targets.len()`.
pub fn transducer_lattice(
    log_probs: &[f64],
    t_len:     usize,
    targets:   &[usize],
    vocab:     usize,
    blank:     usize,
) -> Result<LatticeResult> {
    let u_len = targets.len();
    let width = u_len + 1;
    if t_len == 0 {
        bail!("transducer loss needs at least one frame");
    }
    if log_probs.len() != t_len * width * vocab {
        bail!(
            "lattice expects {} log-probabilities, got {}",
            t_len * width * vocab,
            log_probs.len()
        );
    }
    if let Some(&bad) = targets.iter().find(|&&y| y >= vocab || y == blank) {
        bail!("target label {bad} is blank or outside a vocabulary of {vocab}");
    }

    let lp = |t: usize, u: usize, k: usize| log_probs[(t * width + u) * vocab + k];
    let at = |t: usize, u: usize| t * width + u;

    // ── Forward ───────────────────────────────────────────────────────────────
    let mut alpha = vec![f64::NEG_INFINITY; t_len * width];
    alpha[0] = 0.0;
    for t in 0..t_len {
        for u in 0..width {
            if t == 0 && u == 0 {
                continue;
            }
            let mut a = f64::NEG_INFINITY;
            if t > 0 {
                a = log_add(a, alpha[at(t - 1, u)] + lp(t - 1, u, blank));
            }
            if u > 0 {
                a = log_add(a, alpha[at(t, u - 1)] + lp(t, u - 1, targets[u - 1]));
            }
            alpha[at(t, u)] = a;
        }
    }

    // ── Backward ──────────────────────────────────────────────────────────────
    let mut beta = vec![f64::NEG_INFINITY; t_len * width];
    beta[at(t_len - 1, u_len)] = lp(t_len - 1, u_len, blank);
    for t in (0..t_len).rev() {
        for u in (0..width).rev() {
            if t == t_len - 1 && u == u_len {
                continue;
            }
            let mut b = f64::NEG_INFINITY;
            if t + 1 < t_len {
                b = log_add(b, beta[at(t + 1, u)] + lp(t, u, blank));
            }
            if u < u_len {
                b = log_add(b, beta[at(t, u + 1)] + lp(t, u, targets[u]));
            }
            beta[at(t, u)] = b;
        }
    }

    let log_like = beta[0];
    if !log_like.is_finite() {
        bail!("no valid alignment: {t_len} frames for {u_len} labels");
    }

    // ── Gradient ──────────────────────────────────────────────────────────────
    let mut grad = vec![0.0; log_probs.len()];
    for t in 0..t_len {
        for u in 0..width {
            let base = (t * width + u) * vocab;
            let a = alpha[at(t, u)];

            let next_blank = if t + 1 < t_len {
                beta[at(t + 1, u)]
            } else if u == u_len {
                0.0
            } else {
                f64::NEG_INFINITY
            };
            grad[base + blank] = -(a + lp(t, u, blank) + next_blank - log_like).exp();

            if u < u_len {
                let y = targets[u];
                grad[base + y] = -(a + lp(t, u, y) + beta[at(t, u + 1)] - log_like).exp();
            }
        }
    }

    Ok(LatticeResult { nll: -log_like, grad })
}

// ─── TransducerLoss ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TransducerLoss {
    pub blank:     usize,
    pub reduction: Reduction,
}

impl TransducerLoss {
    pub fn new(blank: usize, reduction: Reduction) -> Self {
        Self { blank, reduction }
    }

    /// Loss of a padded batch.
    ///
    /// - `log_probs`: `[batch, max_frames, max_labels + 1, vocab]`
    /// - `targets`: unpadded label ids per utterance
    /// - `frame_lens`: valid frames per utterance
    ///
    /// Returns a single-element tensor connected to `log_probs`.
    pub fn forward<B: Backend>(
        &self,
        log_probs:  Tensor<B, 4>,
        targets:    &[Vec<usize>],
        frame_lens: &[usize],
    ) -> Result<Tensor<B, 1>> {
        let [batch, max_t, max_u1, vocab] = log_probs.dims();
        if targets.len() != batch || frame_lens.len() != batch {
            bail!(
                "batch of {batch} got {} targets and {} lengths",
                targets.len(),
                frame_lens.len()
            );
        }
        let device = log_probs.device();

        let host: Vec<f32> = log_probs
            .clone()
            .detach()
            .into_data()
            .convert::<f32>()
            .to_vec()
            .map_err(|e| anyhow::anyhow!("cannot read log-probabilities: {e:?}"))?;

        let mut total = 0.0f64;
        let mut grad = vec![0.0f32; host.len()];
        for (b, (target, &t_len)) in targets.iter().zip(frame_lens).enumerate() {
            let u1 = target.len() + 1;
            if t_len > max_t || u1 > max_u1 {
                bail!("utterance {b} ({t_len} frames, {} labels) exceeds the batch tensor", target.len());
            }

            // gather the utterance's [t_len][u1][vocab] block
            let mut block = Vec::with_capacity(t_len * u1 * vocab);
            for t in 0..t_len {
                let start = ((b * max_t + t) * max_u1) * vocab;
                block.extend(host[start..start + u1 * vocab].iter().map(|&x| x as f64));
            }

            let scale = match self.reduction {
                Reduction::Mean => 1.0 / batch as f64,
                Reduction::Sum => 1.0,
                Reduction::LabelMean => 1.0 / (batch * target.len().max(1)) as f64,
            };
            let result = transducer_lattice(&block, t_len, target, vocab, self.blank)?;
            total += result.nll * scale;

            for t in 0..t_len {
                let dst = ((b * max_t + t) * max_u1) * vocab;
                let src = t * u1 * vocab;
                for (g, r) in grad[dst..dst + u1 * vocab]
                    .iter_mut()
                    .zip(&result.grad[src..src + u1 * vocab])
                {
                    *g = (r * scale) as f32;
                }
            }
        }
        let value = total;

        let grad = Tensor::<B, 4>::from_data(
            TensorData::new(grad, [batch, max_t, max_u1, vocab]),
            &device,
        );
        let surrogate = (log_probs * grad).sum();
        let constant = Tensor::<B, 1>::from_floats([value as f32], &device);
        Ok(surrogate.clone() - surrogate.detach() + constant)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray>;

    fn log_softmax(row: &[f64]) -> Vec<f64> {
        let m = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let z = row.iter().map(|x| (x - m).exp()).sum::<f64>().ln() + m;
        row.iter().map(|x| x - z).collect()
    }

    /// Pseudo-random normalized lattice `[t][u1][v]`.
    fn lattice(t: usize, u1: usize, v: usize, seed: u64) -> Vec<f64> {
        let mut state = seed;
        let mut out = Vec::new();
        for _ in 0..t * u1 {
            let row: Vec<f64> = (0..v)
                .map(|_| {
                    state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    ((state >> 33) as f64 / (1u64 << 31) as f64) * 4.0 - 2.0
                })
                .collect();
            out.extend(log_softmax(&row));
        }
        out
    }

    /// Enumerate every alignment explicitly.
    fn brute_force(lp: &[f64], t_len: usize, targets: &[usize], v: usize, blank: usize) -> f64 {
        fn walk(
            lp: &[f64], t: usize, u: usize, t_len: usize, targets: &[usize],
            v: usize, blank: usize, acc: f64, out: &mut Vec<f64>,
        ) {
            let w = targets.len() + 1;
            let at = |t: usize, u: usize, k: usize| lp[(t * w + u) * v + k];
            if t == t_len - 1 && u == targets.len() {
                out.push(acc + at(t, u, blank));
                return;
            }
            if t + 1 < t_len {
                walk(lp, t + 1, u, t_len, targets, v, blank, acc + at(t, u, blank), out);
            }
            if u < targets.len() {
                walk(lp, t, u + 1, t_len, targets, v, blank, acc + at(t, u, targets[u]), out);
            }
        }
        let mut paths = Vec::new();
        walk(lp, 0, 0, t_len, targets, v, blank, 0.0, &mut paths);
        let m = paths.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        -(paths.iter().map(|p| (p - m).exp()).sum::<f64>().ln() + m)
    }

    #[test]
    fn test_matches_brute_force() {
        let targets = [2, 1, 2];
        let lp = lattice(4, 4, 3, 7);
        let fast = transducer_lattice(&lp, 4, &targets, 3, 0).unwrap();
        let slow = brute_force(&lp, 4, &targets, 3, 0);
        assert!((fast.nll - slow).abs() < 1e-9, "{} vs {}", fast.nll, slow);
    }

    #[test]
    fn test_gradient_matches_finite_differences() {
        let targets = [1, 2];
        let lp = lattice(3, 3, 3, 11);
        let result = transducer_lattice(&lp, 3, &targets, 3, 0).unwrap();
        let eps = 1e-6;
        for i in 0..lp.len() {
            let mut bumped = lp.clone();
            bumped[i] += eps;
            let up = transducer_lattice(&bumped, 3, &targets, 3, 0).unwrap().nll;
            let numeric = (up - result.nll) / eps;
            assert!((numeric - result.grad[i]).abs() < 1e-4, "index {i}");
        }
    }

    #[test]
    fn test_blank_only_path() {
        // with no labels the only path is T blanks
        let lp = lattice(3, 1, 2, 3);
        let result = transducer_lattice(&lp, 3, &[], 2, 0).unwrap();
        let expected = -(lp[0] + lp[2] + lp[4]);
        assert!((result.nll - expected).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_bad_input() {
        let lp = lattice(2, 2, 3, 1);
        assert!(transducer_lattice(&lp, 2, &[0], 3, 0).is_err());
        assert!(transducer_lattice(&lp, 2, &[5], 3, 0).is_err());
        assert!(transducer_lattice(&lp, 0, &[1], 3, 0).is_err());
        assert!(transducer_lattice(&lp[1..], 2, &[1], 3, 0).is_err());
    }

    #[test]
    fn test_batch_loss_ignores_padding_and_reduces() {
        let device = Default::default();
        // utterance 0: 3 frames, 2 labels; utterance 1: 2 frames, 1 label
        let (t, u1, v) = (3, 3, 3);
        let a = lattice(3, 3, 3, 5);
        let b = lattice(2, 2, 3, 9);
        let mut padded = vec![-1.0f32; 2 * t * u1 * v];
        for (i, x) in a.iter().enumerate() {
            padded[i] = *x as f32;
        }
        for tt in 0..2 {
            for uu in 0..2 {
                for k in 0..v {
                    padded[((t + tt) * u1 + uu) * v + k] = b[(tt * 2 + uu) * v + k] as f32;
                }
            }
        }
        let targets = vec![vec![1, 2], vec![2]];
        let lens = [3, 2];
        let expected_a = transducer_lattice(&a, 3, &targets[0], 3, 0).unwrap().nll;
        let expected_b = transducer_lattice(&b, 2, &targets[1], 3, 0).unwrap().nll;

        let make = || {
            Tensor::<TestBackend, 4>::from_data(TensorData::new(padded.clone(), [2, t, u1, v]), &device)
        };

        let sum = TransducerLoss::new(0, Reduction::Sum)
            .forward(make(), &targets, &lens)
            .unwrap()
            .into_scalar()
            .elem::<f64>();
        assert!((sum - (expected_a + expected_b)).abs() < 1e-3);

        let mean = TransducerLoss::new(0, Reduction::Mean)
            .forward(make(), &targets, &lens)
            .unwrap()
            .into_scalar()
            .elem::<f64>();
        assert!((mean - (expected_a + expected_b) / 2.0).abs() < 1e-3);

        let per_label = TransducerLoss::new(0, Reduction::LabelMean)
            .forward(make(), &targets, &lens)
            .unwrap()
            .into_scalar()
            .elem::<f64>();
        assert!((per_label - (expected_a / 2.0 + expected_b) / 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_label_mean_scales_the_gradient() {
        let device = Default::default();
        let lp = lattice(3, 3, 3, 33);
        let host: Vec<f32> = lp.iter().map(|&x| x as f32).collect();
        let input = Tensor::<TestBackend, 4>::from_data(TensorData::new(host, [1, 3, 3, 3]), &device)
            .require_grad();

        let loss = TransducerLoss::new(0, Reduction::LabelMean)
            .forward(input.clone(), &[vec![1, 2]], &[3])
            .unwrap();
        let grads = loss.backward();
        let grad: Vec<f32> = input.grad(&grads).unwrap().into_data().convert::<f32>().to_vec().unwrap();

        let expected = transducer_lattice(&lp, 3, &[1, 2], 3, 0).unwrap().grad;
        for (g, e) in grad.iter().zip(&expected) {
            assert!((*g as f64 - e / 2.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_gradient_reaches_the_graph() {
        let device = Default::default();
        let lp = lattice(2, 2, 3, 21);
        let host: Vec<f32> = lp.iter().map(|&x| x as f32).collect();
        let input = Tensor::<TestBackend, 4>::from_data(TensorData::new(host, [1, 2, 2, 3]), &device)
            .require_grad();

        let loss = TransducerLoss::new(0, Reduction::Sum)
            .forward(input.clone(), &[vec![1]], &[2])
            .unwrap();
        let grads = loss.backward();
        let grad: Vec<f32> = input.grad(&grads).unwrap().into_data().convert::<f32>().to_vec().unwrap();

        let expected = transducer_lattice(&lp, 2, &[1], 3, 0).unwrap().grad;
        for (g, e) in grad.iter().zip(&expected) {
            assert!((*g as f64 - e).abs() < 1e-5);
        }
    }
}
