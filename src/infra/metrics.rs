// ============================================================
// Layer 6 — Error Rate and Metrics Logger
// ============================================================
// Two concerns:
//
// 1. ErrorRateStats — phoneme error rate (PER) over a stage.
//    Every utterance is aligned to its reference with the
//    Levenshtein distance, counting the three edit kinds:
//
//      PER = 100 · (insertions + deletions + substitutions)
//                 / reference labels
//
//    The accumulator is reset at the start of every non-train
//    stage and summarized at its end.
//
// 2. MetricsLogger — one CSV row per epoch:
//
//      epoch,train_loss,valid_loss,valid_per
//      1,4.812000,4.350000,100.000000
//      2,3.101000,3.020000,83.333333
//
// Reference: Levenshtein (1966) Binary codes capable of correcting
//            deletions, insertions and reversals

use anyhow::Result;
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};

// ─── Edit distance ────────────────────────────────────────────────────────────

/// Edit counts between a hypothesis and its reference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditCounts {
    pub insertions:    usize,
    pub deletions:     usize,
    pub substitutions: usize,
}

impl EditCounts {
    pub fn total(&self) -> usize {
        self.insertions + self.deletions + self.substitutions
    }
}

/// Minimum edits turning `reference` into `hypothesis`.
///
/// Ties prefer substitution, then deletion, then insertion.
pub fn edit_distance<T: PartialEq>(reference: &[T], hypothesis: &[T]) -> EditCounts {
    let (n, m) = (reference.len(), hypothesis.len());
    // cost[i][j]: (total, counts) for reference[..i] vs hypothesis[..j]
    let mut prev: Vec<(usize, EditCounts)> = (0..=m)
        .map(|j| (j, EditCounts { insertions: j, ..Default::default() }))
        .collect();

    for i in 1..=n {
        let mut row = Vec::with_capacity(m + 1);
        row.push((i, EditCounts { deletions: i, ..Default::default() }));
        for j in 1..=m {
            let (diag_cost, mut diag) = prev[j - 1];
            let same = reference[i - 1] == hypothesis[j - 1];
            if !same {
                diag.substitutions += 1;
            }
            let diag_cost = diag_cost + usize::from(!same);

            let (up_cost, mut up) = prev[j];
            up.deletions += 1;
            let up_cost = up_cost + 1;

            let (left_cost, mut left) = row[j - 1];
            left.insertions += 1;
            let left_cost = left_cost + 1;

            let best = if diag_cost <= up_cost && diag_cost <= left_cost {
                (diag_cost, diag)
            } else if up_cost <= left_cost {
                (up_cost, up)
            } else {
                (left_cost, left)
            };
            row.push(best);
        }
        prev = row;
    }
    prev[m].1
}

// ─── ErrorRateStats ───────────────────────────────────────────────────────────

/// Per-utterance alignment result.
#[derive(Debug, Clone, PartialEq)]
pub struct UtteranceScore {
    pub id:         String,
    pub num_ref:    usize,
    pub edits:      EditCounts,
}

impl UtteranceScore {
    pub fn error_rate(&self) -> f64 {
        if self.num_ref == 0 {
            if self.edits.total() == 0 { 0.0 } else { 100.0 }
        } else {
            100.0 * self.edits.total() as f64 / self.num_ref as f64
        }
    }
}

/// Totals over a stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorRateSummary {
    pub error_rate:    f64,
    pub insertions:    usize,
    pub deletions:     usize,
    pub substitutions: usize,
    pub num_ref:       usize,
    pub num_sentences: usize,
    /// Utterances with at least one error
    pub num_erroneous: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ErrorRateStats {
    scores: Vec<UtteranceScore>,
}

impl ErrorRateStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.scores.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Score a batch of hypotheses against their references.
    pub fn append<T: PartialEq>(&mut self, ids: &[String], hypotheses: &[Vec<T>], references: &[Vec<T>]) {
        for ((id, hyp), reference) in ids.iter().zip(hypotheses).zip(references) {
            self.scores.push(UtteranceScore {
                id:      id.clone(),
                num_ref: reference.len(),
                edits:   edit_distance(reference, hyp),
            });
        }
    }

    pub fn summarize(&self) -> ErrorRateSummary {
        let mut summary = ErrorRateSummary {
            num_sentences: self.scores.len(),
            ..Default::default()
        };
        for s in &self.scores {
            summary.insertions    += s.edits.insertions;
            summary.deletions     += s.edits.deletions;
            summary.substitutions += s.edits.substitutions;
            summary.num_ref       += s.num_ref;
            summary.num_erroneous += usize::from(s.edits.total() > 0);
        }
        let errors = summary.insertions + summary.deletions + summary.substitutions;
        summary.error_rate = if summary.num_ref > 0 {
            100.0 * errors as f64 / summary.num_ref as f64
        } else if errors > 0 {
            100.0
        } else {
            0.0
        };
        summary
    }

    /// Per-utterance results, worst first.
    pub fn scores(&self) -> Vec<&UtteranceScore> {
        let mut sorted: Vec<&UtteranceScore> = self.scores.iter().collect();
        sorted.sort_by(|a, b| b.error_rate().total_cmp(&a.error_rate()));
        sorted
    }
}

// ─── Epoch CSV ────────────────────────────────────────────────────────────────

/// One row of metrics data for a single epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// The epoch number (starts at 1)
    pub epoch:      usize,
    pub train_loss: f64,
    pub valid_loss: f64,
    /// Phoneme error rate on the validation set, in percent
    pub valid_per:  f64,
}

impl EpochMetrics {
    pub fn new(epoch: usize, train_loss: f64, valid_loss: f64, valid_per: f64) -> Self {
        Self { epoch, train_loss, valid_loss, valid_per }
    }

    /// Returns true if this epoch improved over the previous best valid_loss
    pub fn is_improvement(&self, best_valid_loss: f64) -> bool {
        self.valid_loss < best_valid_loss
    }
}

/// Logs epoch metrics to a CSV file for later analysis.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Create the logger, writing the CSV header if the file is new.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let csv_path = dir.join("metrics.csv");

        // appending across runs keeps one history per output folder
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "epoch,train_loss,valid_loss,valid_per")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one epoch's metrics as a new row in the CSV.
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new().append(true).open(&self.csv_path)?;
        writeln!(
            f,
            "{},{:.6},{:.6},{:.6}",
            m.epoch, m.train_loss, m.valid_loss, m.valid_per,
        )?;

        tracing::debug!(
            "Logged epoch {} metrics: train_loss={:.4}, valid_loss={:.4}",
            m.epoch,
            m.train_loss,
            m.valid_loss,
        );
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}
