//! Error types for adapter and registry loading.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading weights, adapters or the persona registry.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed safetensors file: {0}")]
    Format(String),

    #[error("tensor '{0}' not found")]
    MissingTensor(String),

    #[error("unsupported dtype {0} (only F32 tensors can be loaded)")]
    UnsupportedDtype(String),

    #[error("shape mismatch for {name}: expected {expected}, got {got}")]
    ShapeMismatch {
        name: String,
        expected: String,
        got: String,
    },

    #[error("adapter directory {0} does not exist")]
    MissingAdapter(PathBuf),

    #[error("invalid persona '{id}': {reason}")]
    InvalidPersona { id: String, reason: String },

    #[error("persona '{0}' is defined more than once")]
    DuplicatePersona(String),
}

impl AdapterError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AdapterError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, AdapterError>;
