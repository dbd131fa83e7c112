use thiserror::Error;

/// Crypto failures never panic; they are surfaced to the caller (C3) so a
/// message can be tagged rather than dropped.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("decryption failed")]
    DecryptFailed,

    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("identity I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("identity serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
