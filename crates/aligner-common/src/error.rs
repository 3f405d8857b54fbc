//! Error types shared across the aligner crates

use thiserror::Error;

/// Result type alias for aligner operations
pub type Result<T> = std::result::Result<T, AlignerError>;

/// Main error type for aligner crates
#[derive(Error, Debug)]
pub enum AlignerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl AlignerError {
    /// Build a configuration error from anything displayable
    pub fn config(message: impl Into<String>) -> Self {
        AlignerError::Config(message.into())
    }
}
