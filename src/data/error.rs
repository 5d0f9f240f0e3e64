//! Typed failures of the data layer.
//!
//! Manifest, audio and encoder problems surface here with the
//! offending path, record or label attached. The application layer
//! wraps them in `anyhow` with extra context on the way out.

/// Result type alias using [`DataError`].
pub type Result<T> = std::result::Result<T, DataError>;

#[derive(Debug, thiserror::Error)]
pub enum DataError {
    /// Manifest or encoder file could not be read or written.
    #[error("io on '{path}': {source}")]
    Io {
        path:   String,
        #[source]
        source: std::io::Error,
    },

    /// Manifest or encoder file is not valid JSON.
    #[error("malformed json in '{path}': {source}")]
    Json {
        path:   String,
        #[source]
        source: serde_json::Error,
    },

    /// Manifest is valid JSON but not shaped like `{id: {key: value}}`.
    #[error("manifest '{path}': {reason}")]
    Manifest { path: String, reason: String },

    /// WAV decoding failed or the requested segment is out of range.
    #[error("audio '{path}': {reason}")]
    Audio { path: String, reason: String },

    #[error("record '{id}' has no key '{key}'")]
    MissingKey { id: String, key: String },

    #[error("key '{key}' of record '{id}' holds {found}, expected {expected}")]
    WrongType {
        id:       String,
        key:      String,
        expected: &'static str,
        found:    &'static str,
    },

    /// No static key or dynamic item provides the requested key.
    #[error("nothing provides key '{0}'")]
    UnknownKey(String),

    #[error("key '{0}' is provided more than once")]
    DuplicateProvider(String),

    #[error("dynamic items form a cycle through '{0}'")]
    Cycle(String),

    #[error("dynamic item for '{key}' returned {got} values, expected {expected}")]
    Arity { key: String, expected: usize, got: usize },

    #[error("index {index} out of range for dataset of {len} records")]
    OutOfRange { index: usize, len: usize },

    #[error("label '{0}' is not in the encoder")]
    UnknownLabel(String),

    #[error("index {0} is not in the encoder")]
    UnknownIndex(usize),

    #[error("label '{0}' is already in the encoder")]
    DuplicateLabel(String),

    #[error("index {index} is already taken by label '{label}'")]
    IndexTaken { index: usize, label: String },

    #[error("the encoder has no {0} label")]
    MissingSpecial(&'static str),
}

impl DataError {
    /// Dynamic items only see values; attach the record they ran on.
    pub fn in_record(self, record_id: &str) -> Self {
        match self {
            DataError::WrongType { id, key, expected, found } if id.is_empty() => DataError::WrongType {
                id: record_id.to_string(),
                key,
                expected,
                found,
            },
            other => other,
        }
    }
}
