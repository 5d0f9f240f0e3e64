// ============================================================
// Layer 4 — Dataset Preparation
// ============================================================
// Builds the train / valid datasets and the label encoder from
// a data folder holding two manifests:
//
//   <data_folder>/train.json
//   <data_folder>/dev.json
//
// Pipelines attached to both datasets:
//
//   wav ──▶ sig                                   (audio)
//   phn ──▶ phn_list ──▶ phn_encoded ──▶ phn_encoded_bos   (text)
//
// Order matters: the encoding stages need a fitted encoder,
// and fitting needs "phn_list". So the split stage is attached
// first, the encoder is fitted through a phn_list-only view of
// each dataset, and only then are the encoding stages added.
//
// The vocabulary is fitted on BOTH train and valid labels. With
// a tiny corpus the dev set may contain phonemes train never
// shows, and an unknown label would abort the run.

use std::{path::Path, sync::Arc};

use crate::application::hparams::Hyperparams;
use crate::data::audio::read_audio;
use crate::data::encoder::LabelEncoder;
use crate::data::error::{DataError, Result};
use crate::data::pipeline::{DynamicItem, DynamicItemDataset, Pipeline};
use crate::domain::value::Value;

pub const BLANK_LABEL: &str = "<blank>";
pub const BOS_LABEL:   &str = "<bos>";
pub const EOS_LABEL:   &str = "<eos>";

/// Keys every prepared record exposes, and nothing else
pub const OUTPUT_KEYS: [&str; 4] = ["id", "sig", "phn_encoded", "phn_encoded_bos"];

/// Create the train and valid datasets plus the fitted label encoder.
pub fn data_prep(
    data_folder: &Path,
    hparams:     &Hyperparams,
) -> Result<(DynamicItemDataset, DynamicItemDataset, Arc<LabelEncoder>)> {
    let root = data_folder.display().to_string();
    let replacements = [("data_root", root.as_str())];

    // ── Step 1: Declarations ─────────────────────────────────────────────────
    let mut train = DynamicItemDataset::from_json(&data_folder.join("train.json"), &replacements)?;
    let mut valid = DynamicItemDataset::from_json(&data_folder.join("dev.json"), &replacements)?;
    for (ds, name) in [(&train, "train.json"), (&valid, "dev.json")] {
        if ds.is_empty() {
            return Err(DataError::Manifest {
                path:   data_folder.join(name).display().to_string(),
                reason: "no records".to_string(),
            });
        }
    }
    tracing::info!("Manifests loaded: {} train, {} valid", train.len(), valid.len());

    // ── Step 2: Audio pipeline ───────────────────────────────────────────────
    let sample_rate = hparams.features.sample_rate;
    for ds in [&mut train, &mut valid] {
        ds.add_dynamic_item(audio_item(sample_rate))?;
    }

    // ── Step 3: Text pipeline, up to the token list ──────────────────────────
    for ds in [&mut train, &mut valid] {
        ds.add_pipeline(Pipeline::takes("phn").stage("phn_list", split_phonemes))?;
    }

    // ── Step 4: Fit the encoder ──────────────────────────────────────────────
    let mut encoder = LabelEncoder::new();
    encoder.insert_blank(BLANK_LABEL, hparams.blank_index)?;
    encoder.insert_bos_eos(BOS_LABEL, EOS_LABEL, hparams.bos_index, None)?;
    for ds in [&train, &valid] {
        fit_encoder(&mut encoder, ds)?;
    }
    tracing::info!("Label encoder fitted: {} labels", encoder.len());
    let encoder = Arc::new(encoder);

    // ── Step 5: Text pipeline, encoding stages ───────────────────────────────
    for ds in [&mut train, &mut valid] {
        ds.add_pipeline(encoding_pipeline(encoder.clone()))?;
    }

    // ── Step 6: Output keys ──────────────────────────────────────────────────
    for ds in [&mut train, &mut valid] {
        ds.set_output_keys(&OUTPUT_KEYS)?;
    }

    Ok((train, valid, encoder))
}

fn audio_item(sample_rate: u32) -> DynamicItem {
    DynamicItem::new(&["wav"], "sig", move |args: &[&Value]| {
        let source = args[0].as_audio().ok_or_else(|| wrong_type("wav", "audio", args[0]))?;
        let audio = read_audio(&source)?;
        if audio.sample_rate != sample_rate {
            return Err(DataError::Audio {
                path:   source.file,
                reason: format!("sample rate {} Hz, expected {} Hz", audio.sample_rate, sample_rate),
            });
        }
        Ok(Value::Signal(Arc::new(audio.samples)))
    })
}

/// The record id is filled in by the dataset.
fn wrong_type(key: &str, expected: &'static str, found: &Value) -> DataError {
    DataError::WrongType {
        id:    String::new(),
        key:   key.to_string(),
        expected,
        found: found.kind(),
    }
}

fn split_phonemes(phn: &Value) -> Result<Value> {
    let text = phn.as_text().ok_or_else(|| wrong_type("phn", "text", phn))?;
    Ok(Value::Tokens(text.split_whitespace().map(String::from).collect()))
}

fn encoding_pipeline(encoder: Arc<LabelEncoder>) -> Pipeline {
    let bos_encoder = encoder.clone();
    Pipeline::takes("phn_list")
        .stage("phn_encoded", move |list| {
            let tokens = list.as_tokens().ok_or_else(|| wrong_type("phn_list", "tokens", list))?;
            Ok(Value::Ids(encoder.encode_sequence(tokens)?))
        })
        .stage("phn_encoded_bos", move |ids| {
            let ids = ids.as_ids().ok_or_else(|| wrong_type("phn_encoded", "ids", ids))?;
            Ok(Value::Ids(bos_encoder.prepend_bos_index(ids)?))
        })
}

fn fit_encoder(encoder: &mut LabelEncoder, dataset: &DynamicItemDataset) -> Result<()> {
    let view = dataset.output_keys_as(&["phn_list"])?;
    for record in view.iter() {
        let record = record?;
        if let Some(tokens) = record.get("phn_list").and_then(Value::as_tokens) {
            encoder.update_from_iter(tokens);
        }
    }
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use crate::data::fixtures;
    use crate::domain::value::Record;

    fn prepared() -> (tempfile::TempDir, DynamicItemDataset, DynamicItemDataset, Arc<LabelEncoder>) {
        let dir = tempfile::tempdir().unwrap();
        fixtures::write_corpus(dir.path()).unwrap();
        let (train, valid, enc) = data_prep(dir.path(), &Hyperparams::default()).unwrap();
        (dir, train, valid, enc)
    }

    #[test]
    fn test_vocabulary_covers_train_and_dev() {
        let (_dir, train, valid, enc) = prepared();
        assert_eq!(train.len(), fixtures::TRAIN.len());
        assert_eq!(valid.len(), fixtures::DEV.len());

        let distinct: BTreeSet<&str> = fixtures::TRAIN
            .iter()
            .chain(fixtures::DEV)
            .flat_map(|(_, phn)| phn.split_whitespace())
            .collect();
        assert_eq!(enc.len(), distinct.len() + 3);
    }

    #[test]
    fn test_bos_sequence_is_prefixed() {
        let (_dir, train, valid, enc) = prepared();
        let bos = enc.bos_index().unwrap();
        for record in train.iter().chain(valid.iter()) {
            let record = record.unwrap();
            let plain = record["phn_encoded"].as_ids().unwrap();
            let with_bos = record["phn_encoded_bos"].as_ids().unwrap();
            assert_eq!(with_bos.len(), plain.len() + 1);
            assert_eq!(with_bos[0], bos);
            assert_eq!(&with_bos[1..], plain);
        }
    }

    #[test]
    fn test_exactly_four_output_keys() {
        let (_dir, train, valid, _enc) = prepared();
        for ds in [&train, &valid] {
            let record = ds.get(0).unwrap();
            let keys: Vec<&str> = record.keys().map(String::as_str).collect();
            assert_eq!(keys, vec!["id", "phn_encoded", "phn_encoded_bos", "sig"]);
            assert!(matches!(record["sig"], Value::Signal(_)));
        }
    }

    #[test]
    fn test_preparing_twice_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        fixtures::write_corpus(dir.path()).unwrap();
        let hp = Hyperparams::default();
        let (a_train, a_valid, a_enc) = data_prep(dir.path(), &hp).unwrap();
        let (b_train, b_valid, b_enc) = data_prep(dir.path(), &hp).unwrap();

        assert_eq!(a_enc, b_enc);
        for (a, b) in [(&a_train, &b_train), (&a_valid, &b_valid)] {
            assert_eq!(a.len(), b.len());
            for (ra, rb) in a.iter().zip(b.iter()) {
                let (ra, rb) = (ra.unwrap(), rb.unwrap());
                assert_eq!(ra["id"], rb["id"]);
                assert_eq!(ra["phn_encoded"], rb["phn_encoded"]);
                assert_eq!(ra["phn_encoded_bos"], rb["phn_encoded_bos"]);
            }
        }
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let err = data_prep(dir.path(), &Hyperparams::default()).unwrap_err();
        assert!(matches!(err, DataError::Io { .. }));
    }

    #[test]
    fn test_empty_manifest_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fixtures::write_corpus(dir.path()).unwrap();
        std::fs::write(dir.path().join("dev.json"), "{}").unwrap();
        let err = data_prep(dir.path(), &Hyperparams::default()).unwrap_err();
        assert!(matches!(err, DataError::Manifest { ref reason, .. } if reason == "no records"));
    }

    #[test]
    fn test_stages_reject_wrongly_typed_inputs() {
        let err = split_phonemes(&Value::Number(3.0)).unwrap_err();
        assert!(matches!(err, DataError::WrongType { expected: "text", found: "number", .. }));

        let mut ds = DynamicItemDataset::from_records(vec![Record::from([
            ("id".to_string(), Value::Text("utt0".into())),
            ("phn_list".to_string(), Value::Text("aa b".into())),
        ])]);
        ds.add_pipeline(encoding_pipeline(Arc::new(LabelEncoder::new()))).unwrap();
        ds.set_output_keys(&["phn_encoded"]).unwrap();
        assert!(matches!(
            ds.get(0),
            Err(DataError::WrongType { ref id, expected: "tokens", found: "text", .. }) if id == "utt0"
        ));
    }

    #[test]
    fn test_wrong_sample_rate_is_reported_on_access() {
        let dir = tempfile::tempdir().unwrap();
        fixtures::write_corpus(dir.path()).unwrap();
        let mut hp = Hyperparams::default();
        hp.features.sample_rate = 8000;
        let (train, _, _) = data_prep(dir.path(), &hp).unwrap();
        assert!(matches!(train.get(0), Err(DataError::Audio { .. })));
    }
}
