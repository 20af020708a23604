use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProjectionError>;

#[derive(Error, Debug)]
pub enum ProjectionError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Axes error: {0}")]
    AxesError(#[from] lexaxis_axes::AxesError),

    #[error("Vector store error: {0}")]
    VectorStoreError(#[from] lexaxis_vector_store::VectorStoreError),

    #[error(
        "Vocabulary does not match the persisted order: {missing} terms missing, {unexpected} new (e.g. {example})"
    )]
    VocabularyMismatch {
        missing: usize,
        unexpected: usize,
        example: String,
    },

    #[error("Axis {axis}: {actual} scores for a vocabulary of {expected}")]
    ScoreLengthMismatch {
        axis: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("{0}")]
    Other(String),
}
