use std::path::PathBuf;

use persona_gateway::AdapterError;
use persona_tokenizer::TokenizerError;

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors from loading or checking runtime models.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid model config: {0}")]
    Config(String),

    #[error(transparent)]
    Weights(#[from] AdapterError),

    #[error(transparent)]
    Tokenizer(#[from] TokenizerError),

    #[error("persona '{persona}' is incompatible with the base model: {reason}")]
    Incompatible { persona: String, reason: String },
}
