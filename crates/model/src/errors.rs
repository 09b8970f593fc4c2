//! Error types for the model crate

use thiserror::Error;

/// Errors raised while loading artifacts or evaluating the pipeline
#[derive(Error, Debug)]
pub enum ModelError {
    /// Artifact file missing or malformed
    #[error("Invalid model artifact: {0}")]
    Artifact(String),

    /// A value could not be coerced to its declared column type
    #[error("Invalid value provided for {column}: {value}. Expected {expected}")]
    Coercion {
        column: String,
        value: serde_json::Value,
        expected: &'static str,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for model operations
pub type Result<T> = std::result::Result<T, ModelError>;
