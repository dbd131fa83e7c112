use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("a document named '{0}' already exists; use Update instead")]
    DuplicateFilename(String),

    #[error("no document named '{0}' exists")]
    NotFound(String),

    #[error("vector index error: {0}")]
    Index(#[from] anyhow::Error),
}

pub type RagResult<T> = Result<T, RagError>;
