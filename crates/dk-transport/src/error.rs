use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("registration failed: {0}")]
    Register(String),

    #[error("login failed: {0}")]
    Login(String),

    #[error("relay connection failed: {0}")]
    Connect(String),

    #[error("not connected")]
    NotConnected,

    #[error("send deadline exceeded")]
    SendTimeout,

    #[error("network error: {0}")]
    Network(#[from] anyhow::Error),
}

pub type TransportResult<T> = Result<T, TransportError>;
