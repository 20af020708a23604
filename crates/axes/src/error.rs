use thiserror::Error;

pub type Result<T> = std::result::Result<T, AxesError>;

#[derive(Error, Debug)]
pub enum AxesError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Axis '{axis}' is defined twice with conflicting poles (lines {first_line} and {second_line})")]
    ConflictingAxis {
        axis: String,
        first_line: usize,
        second_line: usize,
    },

    #[error("{0}")]
    Other(String),
}
