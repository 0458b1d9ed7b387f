//! Error types for persona-rag.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corpus directory {0} does not exist")]
    MissingCorpus(PathBuf),
}
