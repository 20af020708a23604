use thiserror::Error;

pub type Result<T> = std::result::Result<T, ContextError>;

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Oracle error: {0}")]
    OracleError(String),

    #[error("Oracle returned {actual} results for a request of {expected}")]
    OracleResponseMismatch { expected: usize, actual: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unsupported model '{0}' (expected bert-base-uncased, bert-large-uncased or roberta-base)")]
    UnsupportedModel(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl ContextError {
    pub fn oracle(msg: impl Into<String>) -> Self {
        Self::OracleError(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
