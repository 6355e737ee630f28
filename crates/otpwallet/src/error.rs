//! error types for otpwallet

use otp_merkle::TreeError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("tree error: {0}")]
    Tree(TreeError),

    // === protocol errors ===
    #[error("submitted codes do not match any recovery leaf")]
    CodeMismatch,

    #[error("network error: {0}")]
    Network(String),

    #[error("rejected by verifier: {0}")]
    RejectedByVerifier(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("local state is stale: {0}")]
    StateConflict(String),

    // === local errors ===
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_))
    }
}

impl From<TreeError> for Error {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::Config(msg) => Error::Config(msg),
            other => Error::Tree(other),
        }
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        Error::Storage(format!("sled: {}", err))
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
