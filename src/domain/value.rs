// ============================================================
// Layer 3 — Dynamic Values
// ============================================================
// A dataset record is a map from key to Value. The static keys
// come straight from the JSON manifest ("id", "wav", "phn", ...)
// and the dynamic keys are filled in by pipeline stages
// ("sig", "phn_list", "phn_encoded", "phn_encoded_bos").
//
// Signals are held behind an Arc so a record can be cloned into
// a batch without copying the samples.

use std::{collections::BTreeMap, fmt, sync::Arc};

/// Where an utterance's audio lives: a whole file, or a sample
/// range inside a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSource {
    pub file:  String,
    pub start: Option<usize>,
    pub stop:  Option<usize>,
}

impl AudioSource {
    pub fn whole(file: impl Into<String>) -> Self {
        Self { file: file.into(), start: None, stop: None }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Number(f64),
    Audio(AudioSource),
    Tokens(Vec<String>),
    Ids(Vec<usize>),
    Signal(Arc<Vec<f32>>),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_tokens(&self) -> Option<&[String]> {
        match self {
            Value::Tokens(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_ids(&self) -> Option<&[usize]> {
        match self {
            Value::Ids(ids) => Some(ids),
            _ => None,
        }
    }

    pub fn as_signal(&self) -> Option<&Arc<Vec<f32>>> {
        match self {
            Value::Signal(sig) => Some(sig),
            _ => None,
        }
    }

    /// A path string or an explicit segment both describe audio.
    pub fn as_audio(&self) -> Option<AudioSource> {
        match self {
            Value::Text(path) => Some(AudioSource::whole(path.clone())),
            Value::Audio(src) => Some(src.clone()),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Text(_)   => "text",
            Value::Number(_) => "number",
            Value::Audio(_)  => "audio",
            Value::Tokens(_) => "tokens",
            Value::Ids(_)    => "ids",
            Value::Signal(_) => "signal",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s)     => write!(f, "{s}"),
            Value::Number(n)   => write!(f, "{n}"),
            Value::Audio(src)  => write!(f, "{}", src.file),
            Value::Tokens(t)   => write!(f, "{}", t.join(" ")),
            Value::Ids(ids)    => write!(f, "{ids:?}"),
            Value::Signal(sig) => write!(f, "<signal: {} samples>", sig.len()),
        }
    }
}

/// One dataset record: key → value, ordered for stable output
pub type Record = BTreeMap<String, Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_path_reads_as_whole_file() {
        let v = Value::Text("a.wav".into());
        assert_eq!(v.as_audio(), Some(AudioSource::whole("a.wav")));
    }

    #[test]
    fn test_accessors_reject_other_variants() {
        let v = Value::Ids(vec![1, 2]);
        assert!(v.as_text().is_none());
        assert!(v.as_tokens().is_none());
        assert_eq!(v.as_ids(), Some(&[1usize, 2][..]));
        assert_eq!(v.kind(), "ids");
    }
}
