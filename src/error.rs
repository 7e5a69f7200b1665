use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the embedding model.
///
/// Inference errors (`NotInVocabulary`, `AllOov`, `LengthMismatch`) are
/// returned to the caller; I/O errors during training are fatal and abort
/// the training run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("word not in vocabulary: {0:?}")]
    NotInVocabulary(String),

    #[error("all word pairs are out of vocabulary")]
    AllOov,

    #[error("input sequences have different lengths ({left} vs {right})")]
    LengthMismatch { left: usize, right: usize },

    #[error("i/o error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt model: {0}")]
    CorruptModel(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Error::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}
