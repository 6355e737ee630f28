//! error types for tree construction

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TreeError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("invalid tree parameters: {0}")]
    Config(String),

    #[error("eotp: {0}")]
    Eotp(String),

    #[error("tree construction cancelled")]
    Cancelled,

    #[error("malformed tree: {0}")]
    Malformed(String),

    #[error("leaf index {index} out of range (tree has {leaves} leaves)")]
    IndexOutOfRange { index: usize, leaves: usize },
}
