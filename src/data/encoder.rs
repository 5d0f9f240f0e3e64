// ============================================================
// Layer 4 — Label Encoder
// ============================================================
// Maps phoneme symbols to integer ids and back.
//
// A transducer vocabulary has three reserved entries on top of
// the phonemes themselves:
//
//   <blank>  "emit nothing, move to the next frame"
//   <bos>    start token fed to the prediction network
//   <eos>    end marker (kept for symmetry with seq2seq models)
//
// The reserved entries are inserted first at fixed indices
// (taken from the hyperparameters), then the phoneme inventory
// is filled in from the datasets in first-seen order using the
// smallest free index each time. For the default indices this
// gives:
//
//   0 → <blank>   1 → <bos>   2 → <eos>   3.. → phonemes
//
// Once fitted the encoder is wrapped in an Arc and never
// mutated again.
//
// Reference: Graves (2012) Sequence Transduction with RNNs

use std::{collections::BTreeMap, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::data::error::{DataError, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelEncoder {
    lab2ind:     BTreeMap<String, usize>,
    ind2lab:     BTreeMap<usize, String>,
    blank_label: Option<String>,
    bos_label:   Option<String>,
    eos_label:   Option<String>,
}

/// On-disk layout, written next to the model checkpoint
#[derive(Serialize, Deserialize)]
struct EncoderFile {
    labels:      Vec<(usize, String)>,
    blank_label: Option<String>,
    bos_label:   Option<String>,
    eos_label:   Option<String>,
}

impl LabelEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ind2lab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ind2lab.is_empty()
    }

    // ─── Building the vocabulary ─────────────────────────────────────────────

    /// Add a new label at the smallest unused index.
    pub fn add_label(&mut self, label: &str) -> Result<usize> {
        if self.lab2ind.contains_key(label) {
            return Err(DataError::DuplicateLabel(label.to_string()));
        }
        let index = self.next_free_index();
        self.lab2ind.insert(label.to_string(), index);
        self.ind2lab.insert(index, label.to_string());
        Ok(index)
    }

    /// Add a label at a specific index.
    pub fn insert_label(&mut self, label: &str, index: usize) -> Result<()> {
        if self.lab2ind.contains_key(label) {
            return Err(DataError::DuplicateLabel(label.to_string()));
        }
        if let Some(existing) = self.ind2lab.get(&index) {
            return Err(DataError::IndexTaken { index, label: existing.clone() });
        }
        self.lab2ind.insert(label.to_string(), index);
        self.ind2lab.insert(index, label.to_string());
        Ok(())
    }

    /// Reserve the blank label used by the transducer loss.
    pub fn insert_blank(&mut self, label: &str, index: usize) -> Result<()> {
        self.insert_label(label, index)?;
        self.blank_label = Some(label.to_string());
        Ok(())
    }

    /// Reserve the begin/end-of-sequence labels.
    ///
    /// When both labels are the same string a single shared entry
    /// is inserted at `bos_index`. Otherwise `eos` goes to
    /// `eos_index`, or to the next free index when none is given.
    pub fn insert_bos_eos(
        &mut self,
        bos_label: &str,
        eos_label: &str,
        bos_index: usize,
        eos_index: Option<usize>,
    ) -> Result<()> {
        self.insert_label(bos_label, bos_index)?;
        if eos_label != bos_label {
            match eos_index {
                Some(index) => self.insert_label(eos_label, index)?,
                None => {
                    self.add_label(eos_label)?;
                }
            }
        } else {
            tracing::debug!("bos and eos share label '{}'", bos_label);
        }
        self.bos_label = Some(bos_label.to_string());
        self.eos_label = Some(eos_label.to_string());
        Ok(())
    }

    /// Add every label not seen so far, keeping first-seen order.
    /// Returns how many new labels were added.
    pub fn update_from_iter<I, S>(&mut self, labels: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut added = 0;
        for label in labels {
            let label = label.as_ref();
            if !self.lab2ind.contains_key(label) {
                let index = self.next_free_index();
                self.lab2ind.insert(label.to_string(), index);
                self.ind2lab.insert(index, label.to_string());
                added += 1;
            }
        }
        added
    }

    fn next_free_index(&self) -> usize {
        // ind2lab is ordered, so the first gap is the answer
        let mut candidate = 0;
        for &index in self.ind2lab.keys() {
            if index != candidate {
                break;
            }
            candidate += 1;
        }
        candidate
    }

    // ─── Encoding and decoding ───────────────────────────────────────────────

    pub fn encode_label(&self, label: &str) -> Result<usize> {
        self.lab2ind
            .get(label)
            .copied()
            .ok_or_else(|| DataError::UnknownLabel(label.to_string()))
    }

    pub fn encode_sequence<S: AsRef<str>>(&self, labels: &[S]) -> Result<Vec<usize>> {
        labels.iter().map(|l| self.encode_label(l.as_ref())).collect()
    }

    pub fn decode_index(&self, index: usize) -> Result<&str> {
        self.ind2lab
            .get(&index)
            .map(String::as_str)
            .ok_or(DataError::UnknownIndex(index))
    }

    pub fn decode_sequence(&self, indices: &[usize]) -> Result<Vec<String>> {
        indices
            .iter()
            .map(|&i| self.decode_index(i).map(str::to_string))
            .collect()
    }

    /// `[bos] + ids`, the input of the prediction network
    pub fn prepend_bos_index(&self, ids: &[usize]) -> Result<Vec<usize>> {
        let bos = self.bos_index().ok_or(DataError::MissingSpecial("bos"))?;
        let mut out = Vec::with_capacity(ids.len() + 1);
        out.push(bos);
        out.extend_from_slice(ids);
        Ok(out)
    }

    /// `ids + [eos]`
    pub fn append_eos_index(&self, ids: &[usize]) -> Result<Vec<usize>> {
        let eos = self.eos_index().ok_or(DataError::MissingSpecial("eos"))?;
        let mut out = ids.to_vec();
        out.push(eos);
        Ok(out)
    }

    pub fn blank_index(&self) -> Option<usize> {
        self.special_index(&self.blank_label)
    }

    pub fn bos_index(&self) -> Option<usize> {
        self.special_index(&self.bos_label)
    }

    pub fn eos_index(&self) -> Option<usize> {
        self.special_index(&self.eos_label)
    }

    fn special_index(&self, label: &Option<String>) -> Option<usize> {
        label.as_ref().and_then(|l| self.lab2ind.get(l).copied())
    }

    /// True for blank/bos/eos
    pub fn is_special(&self, index: usize) -> bool {
        [self.blank_index(), self.bos_index(), self.eos_index()]
            .contains(&Some(index))
    }

    // ─── Persistence ─────────────────────────────────────────────────────────

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = EncoderFile {
            labels:      self.ind2lab.iter().map(|(&i, l)| (i, l.clone())).collect(),
            blank_label: self.blank_label.clone(),
            bos_label:   self.bos_label.clone(),
            eos_label:   self.eos_label.clone(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(|source| DataError::Json {
            path: path.display().to_string(),
            source,
        })?;
        fs::write(path, json).map_err(|source| DataError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|source| DataError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: EncoderFile = serde_json::from_str(&json).map_err(|source| DataError::Json {
            path: path.display().to_string(),
            source,
        })?;

        let mut encoder = Self::new();
        for (index, label) in &file.labels {
            encoder.insert_label(label, *index)?;
        }
        encoder.blank_label = file.blank_label;
        encoder.bos_label   = file.bos_label;
        encoder.eos_label   = file.eos_label;
        Ok(encoder)
    }
}
