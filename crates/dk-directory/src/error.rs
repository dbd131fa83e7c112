use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("peer '{0}' is unknown and could not be resolved from the relay")]
    NotFound(String),

    #[error("relay lookup for '{0}' timed out")]
    FetchTimeout(String),

    #[error("relay lookup failed: {0}")]
    FetchFailed(#[from] anyhow::Error),
}

pub type DirectoryResult<T> = Result<T, DirectoryError>;
