// ============================================================
// Layer 4 — Manifest Loader
// ============================================================
// Reads a JSON manifest describing one dataset split:
//
//   {
//     "spk1_snt1": {
//       "wav": "$data_root/spk1_snt1.wav",
//       "length": 2.87,
//       "phn": "sil hh ah l ow sil"
//     },
//     "spk1_snt2": {
//       "wav": { "file": "$data_root/long.wav", "start": 0, "stop": 16000 },
//       "phn": "sil y eh s sil"
//     }
//   }
//
// Each top-level key becomes the record "id". String values go
// through placeholder replacement so manifests stay relocatable:
// `$data_root` and `${data_root}` both expand to the folder the
// caller passes in.
//
// Records come back sorted by id, which keeps every run over the
// same manifest in the same order.

use std::{fs, path::Path};

use serde_json::Value as Json;

use crate::data::error::{DataError, Result};
use crate::domain::value::{AudioSource, Record, Value};

/// Load every record of a manifest, applying `replacements`
/// (placeholder name → substitute) to all string values.
pub fn load_manifest(path: &Path, replacements: &[(&str, &str)]) -> Result<Vec<Record>> {
    let shown = path.display().to_string();

    let text = fs::read_to_string(path).map_err(|source| DataError::Io {
        path: shown.clone(),
        source,
    })?;
    let root: Json = serde_json::from_str(&text).map_err(|source| DataError::Json {
        path: shown.clone(),
        source,
    })?;

    let Json::Object(entries) = root else {
        return Err(DataError::Manifest {
            path:   shown,
            reason: "top level must be an object keyed by utterance id".into(),
        });
    };

    let mut records = Vec::with_capacity(entries.len());
    for (id, fields) in entries {
        let Json::Object(fields) = fields else {
            return Err(DataError::Manifest {
                path:   shown,
                reason: format!("entry '{id}' must be an object"),
            });
        };

        let mut record = Record::new();
        for (key, raw) in fields {
            let value = convert(&raw, replacements).ok_or_else(|| DataError::Manifest {
                path:   shown.clone(),
                reason: format!("entry '{id}': unsupported value for key '{key}'"),
            })?;
            record.insert(key, value);
        }
        record.insert("id".to_string(), Value::Text(id));
        records.push(record);
    }

    tracing::debug!("Loaded {} records from '{}'", records.len(), shown);
    Ok(records)
}

fn convert(raw: &Json, replacements: &[(&str, &str)]) -> Option<Value> {
    match raw {
        Json::String(s) => Some(Value::Text(substitute(s, replacements))),
        Json::Number(n) => n.as_f64().map(Value::Number),
        Json::Object(obj) => {
            // Only audio segments are allowed as nested objects
            let file = obj.get("file")?.as_str()?;
            let bound = |key: &str| obj.get(key).and_then(Json::as_u64).map(|v| v as usize);
            Some(Value::Audio(AudioSource {
                file:  substitute(file, replacements),
                start: bound("start"),
                stop:  bound("stop"),
            }))
        }
        _ => None,
    }
}

/// Expand `$name` and `${name}` placeholders.
pub fn substitute(text: &str, replacements: &[(&str, &str)]) -> String {
    let mut out = text.to_string();
    for (name, value) in replacements {
        out = out.replace(&format!("${{{name}}}"), value);
        out = out.replace(&format!("${name}"), value);
    }
    out
}
