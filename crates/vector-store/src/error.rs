use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Missing word counts for partition {partition}: {path}")]
    MissingCounts { partition: String, path: PathBuf },

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Invalid statistics: {0}")]
    InvalidStats(String),

    #[error("Accumulator overflow for term '{0}'")]
    Overflow(String),

    #[error("{0}")]
    Other(String),
}
