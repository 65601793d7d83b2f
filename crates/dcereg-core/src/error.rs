use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image format error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Numerical failure: {0}")]
    Numerical(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: String, actual: String },

    #[error("Image index {index} out of range (total: {total})")]
    ImageIndexOutOfRange { index: usize, total: usize },

    #[error("Empty image series")]
    EmptySeries,

    #[error("Worker error: {0}")]
    Worker(String),
}

impl RegistrationError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm(msg.into())
    }

    pub fn numerical(msg: impl Into<String>) -> Self {
        Self::Numerical(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, RegistrationError>;
