// ============================================================
// Layer 4 — Transducer Dataset
// ============================================================
// Bridges the dynamic-item world (records of loosely typed
// Values) and Burn's DataLoader (typed samples).
//
// Every record of the prepared DynamicItemDataset is resolved
// once, up front, into a TransducerSample. Doing it eagerly
// means a broken WAV or an unknown phoneme is reported as an
// error before training starts instead of inside a loader
// worker, where Burn's Dataset::get() could only return None.
//
// Reference: Burn Book §4 (Datasets)

use std::sync::Arc;

use burn::data::dataset::Dataset;

use crate::data::error::{DataError, Result};
use crate::data::pipeline::DynamicItemDataset;
use crate::domain::value::{Record, Value};

/// One utterance, ready for batching.
#[derive(Debug, Clone, PartialEq)]
pub struct TransducerSample {
    pub id:              String,
    /// Mono waveform
    pub sig:             Arc<Vec<f32>>,
    /// Target label ids
    pub phn_encoded:     Vec<usize>,
    /// `[bos] + phn_encoded`, the prediction network input
    pub phn_encoded_bos: Vec<usize>,
}

impl TryFrom<Record> for TransducerSample {
    type Error = DataError;

    fn try_from(record: Record) -> Result<Self> {
        let id = record
            .get("id")
            .and_then(Value::as_text)
            .unwrap_or("<no id>")
            .to_string();

        let field = |key: &str| {
            record.get(key).ok_or_else(|| DataError::MissingKey {
                id:  id.clone(),
                key: key.to_string(),
            })
        };
        let wrong = |key: &str, expected: &'static str, found: &Value| DataError::WrongType {
            id: id.clone(),
            key: key.to_string(),
            expected,
            found: found.kind(),
        };

        let sig = field("sig")?;
        let sig = sig.as_signal().ok_or_else(|| wrong("sig", "signal", sig))?.clone();

        let phn = field("phn_encoded")?;
        let phn_encoded = phn.as_ids().ok_or_else(|| wrong("phn_encoded", "ids", phn))?.to_vec();

        let bos = field("phn_encoded_bos")?;
        let phn_encoded_bos = bos
            .as_ids()
            .ok_or_else(|| wrong("phn_encoded_bos", "ids", bos))?
            .to_vec();

        Ok(Self { id, sig, phn_encoded, phn_encoded_bos })
    }
}

pub struct TransducerDataset {
    samples: Vec<TransducerSample>,
}

impl TransducerDataset {
    pub fn new(samples: Vec<TransducerSample>) -> Self {
        Self { samples }
    }

    /// Resolve every record of a prepared dataset.
    pub fn from_dynamic(dataset: &DynamicItemDataset) -> Result<Self> {
        let samples = dataset
            .iter()
            .map(|record| record.and_then(TransducerSample::try_from))
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!("Materialized {} samples", samples.len());
        Ok(Self { samples })
    }

    pub fn samples(&self) -> &[TransducerSample] {
        &self.samples
    }
}

impl Dataset<TransducerSample> for TransducerDataset {
    fn get(&self, index: usize) -> Option<TransducerSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn record(with_sig: bool) -> Record {
        let mut r = Record::new();
        r.insert("id".into(), Value::Text("utt1".into()));
        if with_sig {
            r.insert("sig".into(), Value::Signal(Arc::new(vec![0.0, 0.1])));
        }
        r.insert("phn_encoded".into(), Value::Ids(vec![3, 4]));
        r.insert("phn_encoded_bos".into(), Value::Ids(vec![1, 3, 4]));
        r
    }

    #[test]
    fn test_sample_from_record() {
        let sample = TransducerSample::try_from(record(true)).unwrap();
        assert_eq!(sample.id, "utt1");
        assert_eq!(sample.sig.len(), 2);
        assert_eq!(sample.phn_encoded_bos, vec![1, 3, 4]);
    }

    #[test]
    fn test_missing_and_mistyped_fields() {
        let err = TransducerSample::try_from(record(false)).unwrap_err();
        assert!(matches!(err, DataError::MissingKey { ref key, .. } if key == "sig"));

        let mut r = record(true);
        r.insert("phn_encoded".into(), Value::Text("a b".into()));
        let err = TransducerSample::try_from(r).unwrap_err();
        assert!(matches!(err, DataError::WrongType { expected: "ids", found: "text", .. }));
    }

    #[test]
    fn test_dataset_trait() {
        let ds = TransducerDataset::new(vec![TransducerSample::try_from(record(true)).unwrap()]);
        assert_eq!(ds.len(), 1);
        assert!(ds.get(0).is_some());
        assert!(ds.get(1).is_none());
    }

    #[test]
    fn test_from_dynamic_propagates_errors() {
        let dynamic = DynamicItemDataset::from_records(vec![record(false)]);
        assert!(TransducerDataset::from_dynamic(&dynamic).is_err());

        let dynamic = DynamicItemDataset::from_records(vec![record(true)]);
        assert_eq!(TransducerDataset::from_dynamic(&dynamic).unwrap().len(), 1);
    }
}
